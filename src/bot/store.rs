//! In-memory caches owned by the bot session.
//!
//! Both caches are bounded. The oldest inserted item goes first when a bound
//! is hit, and a bound of zero disables the cache.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bot::message::{InboundMessage, Jid};
use crate::classifier::is_tournament_list;

/// Ids of messages the bot has sent, for reply detection.
#[derive(Debug, Default)]
pub struct SentMessageIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SentMessageIds {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Record an id. Returns false if it was already known or the cache is disabled.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let id = id.into();
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A tournament list as it was posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentListEntry {
    pub text: String,
    /// Unix seconds of the original message.
    pub timestamp: i64,
}

/// Tournament lists seen per group.
#[derive(Debug, Default)]
pub struct TournamentListStore {
    lists: HashMap<Jid, VecDeque<TournamentListEntry>>,
    per_group: usize,
}

impl TournamentListStore {
    pub fn new(per_group: usize) -> Self {
        Self {
            lists: HashMap::new(),
            per_group,
        }
    }

    /// Keep the message if its text is a tournament list. Returns whether it was kept.
    pub fn store_if_tournament_list(&mut self, msg: &InboundMessage, group: &Jid) -> bool {
        let Some(text) = msg.body() else {
            return false;
        };
        if self.per_group == 0 || !is_tournament_list(text) {
            return false;
        }

        let list = self.lists.entry(group.clone()).or_default();
        list.push_back(TournamentListEntry {
            text: text.to_string(),
            timestamp: msg.message_timestamp,
        });
        while list.len() > self.per_group {
            list.pop_front();
        }
        true
    }

    /// Entry with the greatest timestamp. On a tie the earliest stored wins.
    pub fn last_tournament_list(&self, group: &Jid) -> Option<&TournamentListEntry> {
        self.lists.get(group)?.iter().reduce(|best, entry| {
            if entry.timestamp > best.timestamp { entry } else { best }
        })
    }

    pub fn len(&self, group: &Jid) -> usize {
        self.lists.get(group).map_or(0, VecDeque::len)
    }
}
