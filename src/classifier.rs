//! Predicates that decide what to do with an inbound message.
//!
//! All of them are pure: a missing field makes the answer `false`,
//! never an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::bot::message::{InboundMessage, Jid, MessageUpdate, UpdateKind};
use crate::bot::store::SentMessageIds;

/// Default marker that turns a message into a command request.
pub const COMMAND_MARKER: &str = "!!";

/// Tournament announcement: optional decoration, the header word, then free text.
static TOURNAMENT_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\A\W*torneios?\b.+").unwrap());

/// Whether an update should be processed at all.
///
/// Only live (`notify`) updates carrying text or an image caption qualify.
/// Messages the bot sent itself are dropped when they target the bot's own
/// chat, a broadcast list or a status feed.
pub fn is_message_valid(update: &MessageUpdate, bot: &Jid) -> bool {
    if update.kind != UpdateKind::Notify {
        return false;
    }
    let Some(msg) = update.first() else {
        return false;
    };
    if msg.body().is_none() {
        return false;
    }
    let Some(from) = msg.chat() else {
        return false;
    };

    let from_me = msg.key.from_me || msg.key.participant.as_ref() == Some(bot);
    !from_me || !(from == bot || from.is_broadcast() || from.is_status())
}

/// Whether the message quotes one the bot sent.
pub fn is_message_reply(msg: &InboundMessage, sent: &SentMessageIds) -> bool {
    msg.quoted_id().is_some_and(|id| sent.contains(id))
}

pub fn is_command_message(text: &str, marker: &str) -> bool {
    !marker.is_empty() && text.contains(marker)
}

pub fn is_tournament_list(text: &str) -> bool {
    TOURNAMENT_LIST.is_match(text)
}
