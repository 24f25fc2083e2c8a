//! Telegram transport using teloxide.
//!
//! Maps Telegram chats and messages onto the protocol-neutral envelope and
//! implements [`ChatClient`]. The Bot API cannot enumerate a bot's groups or
//! their members, so both are remembered from the updates the bot sees.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use teloxide::prelude::*;
use teloxide::types::{Chat, InputFile, MessageId, ParseMode, ReplyParameters};
use tracing::{debug, info, warn};

use crate::bot::client::{
    ChatClient, ClientError, GroupMetadata, GroupSummary, OutgoingMessage, SentMessage,
};
use crate::bot::message::{
    ContextInfo, ExtendedTextMessage, ImageMessage, InboundMessage, Jid, MessageContent,
    MessageKey, MessageUpdate, UpdateKind,
};

/// Chats and members seen so far.
#[derive(Debug, Default)]
struct Roster {
    groups: HashMap<i64, GroupRecord>,
}

#[derive(Debug, Default)]
struct GroupRecord {
    title: String,
    members: BTreeSet<u64>,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
    bot_id: UserId,
    roster: Mutex<Roster>,
}

impl TelegramClient {
    pub fn new(bot: Bot, bot_id: UserId) -> Self {
        Self {
            bot,
            bot_id,
            roster: Mutex::new(Roster::default()),
        }
    }

    pub fn bot_jid(&self) -> Jid {
        Jid::user(self.bot_id.0 as i64)
    }

    /// Remember the chat and its members from an incoming message.
    pub fn observe(&self, msg: &Message) {
        if !(msg.chat.is_group() || msg.chat.is_supergroup()) {
            return;
        }
        let mut roster = self.roster.lock().unwrap_or_else(PoisonError::into_inner);
        let record = roster.groups.entry(msg.chat.id.0).or_default();
        if let Some(title) = msg.chat.title() {
            record.title = title.to_string();
        }
        if let Some(user) = msg.from.as_ref().filter(|u| !u.is_bot) {
            record.members.insert(user.id.0);
        }
        if let Some(joined) = msg.new_chat_members() {
            record
                .members
                .extend(joined.iter().filter(|u| !u.is_bot).map(|u| u.id.0));
        }
        if let Some(left) = msg.left_chat_member() {
            record.members.remove(&left.id.0);
        }
    }

    /// Convert a Telegram message into an envelope.
    pub fn to_update(&self, msg: &Message, kind: UpdateKind) -> MessageUpdate {
        MessageUpdate {
            kind,
            messages: vec![to_inbound(msg, self.bot_id)],
        }
    }

    fn remembered_members(&self, chat_id: i64) -> (Option<String>, BTreeSet<u64>) {
        let roster = self.roster.lock().unwrap_or_else(PoisonError::into_inner);
        match roster.groups.get(&chat_id) {
            Some(record) => (Some(record.title.clone()), record.members.clone()),
            None => (None, BTreeSet::new()),
        }
    }
}

fn chat_jid(chat: &Chat) -> Jid {
    if chat.is_channel() {
        Jid::broadcast(chat.id.0)
    } else if chat.is_group() || chat.is_supergroup() {
        Jid::group(chat.id.0)
    } else {
        Jid::user(chat.id.0)
    }
}

/// Message ids are only unique per chat, so the chat is part of the id.
pub fn message_id(chat_id: i64, message_id: i32) -> String {
    format!("{chat_id}/{message_id}")
}

pub fn parse_message_id(id: &str) -> Result<(i64, i32), ClientError> {
    let invalid = || ClientError::InvalidMessageId(id.to_string());
    let (chat, msg) = id.split_once('/').ok_or_else(invalid)?;
    Ok((chat.parse().map_err(|_| invalid())?, msg.parse().map_err(|_| invalid())?))
}

fn chat_id_of(jid: &Jid) -> Result<ChatId, ClientError> {
    jid.numeric_id()
        .map(ChatId)
        .ok_or_else(|| ClientError::InvalidJid(jid.to_string()))
}

fn to_inbound(msg: &Message, bot_id: UserId) -> InboundMessage {
    let remote_jid = chat_jid(&msg.chat);
    let sender = msg.from.as_ref();
    let participant = if remote_jid.is_group() {
        sender.map(|u| Jid::user(u.id.0 as i64))
    } else {
        None
    };

    let content = if let Some(text) = msg.text() {
        match msg.reply_to_message() {
            Some(reply) => MessageContent {
                extended_text_message: Some(ExtendedTextMessage {
                    text: Some(text.to_string()),
                    context_info: Some(ContextInfo {
                        stanza_id: Some(message_id(reply.chat.id.0, reply.id.0)),
                        participant: reply.from.as_ref().map(|u| Jid::user(u.id.0 as i64)),
                    }),
                }),
                ..Default::default()
            },
            None => MessageContent {
                conversation: Some(text.to_string()),
                ..Default::default()
            },
        }
    } else if msg.photo().is_some() {
        MessageContent {
            image_message: Some(ImageMessage {
                caption: msg.caption().map(str::to_string),
            }),
            ..Default::default()
        }
    } else {
        MessageContent::default()
    };

    InboundMessage {
        key: MessageKey {
            remote_jid: Some(remote_jid),
            from_me: sender.is_some_and(|u| u.id == bot_id),
            id: Some(message_id(msg.chat.id.0, msg.id.0)),
            participant,
        },
        message: Some(content),
        message_timestamp: msg.date.timestamp(),
        push_name: sender.map(|u| u.first_name.clone()),
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

/// Invisible user links: Telegram notifies every linked user.
fn render_mentions(mentions: &[Jid]) -> String {
    mentions
        .iter()
        .filter(|jid| jid.is_user())
        .filter_map(Jid::numeric_id)
        .map(|id| format!("<a href=\"tg://user?id={id}\">\u{200b}</a>"))
        .collect()
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send(&self, jid: &Jid, message: OutgoingMessage) -> Result<SentMessage, ClientError> {
        let chat_id = chat_id_of(jid)?;
        let mut mentions = message.mentions;
        let reply_to = match message.quoted {
            Some(quote) => {
                if !mentions.contains(&quote.participant) {
                    mentions.push(quote.participant);
                }
                Some(MessageId(parse_message_id(&quote.id)?.1))
            }
            None => None,
        };
        let mentions = render_mentions(&mentions);

        let sent = if let Some(image) = message.image {
            info!("📷 Sending image to {} ({} bytes)", jid, image.len());
            let caption = format!("{}{}", html_escape(message.caption.as_deref().unwrap_or("")), mentions);
            let mut request = self
                .bot
                .send_photo(chat_id, InputFile::memory(image).file_name("image.jpg"))
                .parse_mode(ParseMode::Html);
            if !caption.is_empty() {
                request = request.caption(caption);
            }
            if let Some(msg_id) = reply_to {
                request = request.reply_parameters(ReplyParameters::new(msg_id));
            }
            request.await
        } else {
            let body = message.text.or(message.caption).unwrap_or_default();
            if body.is_empty() {
                return Err(ClientError::EmptyMessage);
            }
            let text = format!("{}{}", html_escape(&body), mentions);
            let mut request = self
                .bot
                .send_message(chat_id, text)
                .parse_mode(ParseMode::Html);
            if let Some(msg_id) = reply_to {
                request = request.reply_parameters(ReplyParameters::new(msg_id));
            }
            request.await
        };

        sent.map(|msg| SentMessage { id: message_id(msg.chat.id.0, msg.id.0) })
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                ClientError::Request(msg)
            })
    }

    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, ClientError> {
        let chat_id = chat_id_of(jid)?;
        let admins = self
            .bot
            .get_chat_administrators(chat_id)
            .await
            .map_err(|e| {
                let msg = format!("Failed to get chat admins: {e}");
                warn!("{}", msg);
                ClientError::Request(msg)
            })?;

        let (title, mut members) = self.remembered_members(chat_id.0);
        members.extend(admins.iter().filter(|m| !m.user.is_bot).map(|m| m.user.id.0));
        debug!("{} has {} known participant(s)", jid, members.len());

        Ok(GroupMetadata {
            subject: title.unwrap_or_else(|| jid.to_string()),
            participants: members.into_iter().map(|id| Jid::user(id as i64)).collect(),
        })
    }

    async fn list_groups(&self) -> Result<Vec<GroupSummary>, ClientError> {
        let roster = self.roster.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(roster
            .groups
            .iter()
            .map(|(id, record)| GroupSummary {
                jid: Jid::group(*id),
                subject: record.title.clone(),
            })
            .collect())
    }

    async fn update_group_picture(&self, jid: &Jid, image: Vec<u8>) -> Result<(), ClientError> {
        let chat_id = chat_id_of(jid)?;
        info!("🖼️ Setting chat photo for {} ({} bytes)", jid, image.len());
        self.bot
            .set_chat_photo(chat_id, InputFile::memory(image).file_name("picture.png"))
            .await
            .map_err(|e| {
                let msg = format!("Failed to set chat photo: {e}");
                warn!("{}", msg);
                ClientError::Request(msg)
            })?;
        Ok(())
    }
}
