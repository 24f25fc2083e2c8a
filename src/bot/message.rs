//! Inbound message envelope as delivered by the messaging client.
//!
//! The shape mirrors the protocol's JSON (`type`, `messages[].key.remoteJid`,
//! `message.extendedTextMessage.contextInfo.stanzaId`, ...) so updates can be
//! deserialized straight from a bridge or built by the Telegram transport.
//! Every field is optional: a partial envelope is simply an invalid message.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const GROUP_SUFFIX: &str = "@group";
pub const USER_SUFFIX: &str = "@user";
pub const BROADCAST_SUFFIX: &str = "@broadcast";

/// Protocol identifier of a group, user or channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn group(id: i64) -> Self {
        Self(format!("{id}{GROUP_SUFFIX}"))
    }

    pub fn user(id: i64) -> Self {
        Self(format!("{id}{USER_SUFFIX}"))
    }

    pub fn broadcast(id: i64) -> Self {
        Self(format!("{id}{BROADCAST_SUFFIX}"))
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    pub fn is_user(&self) -> bool {
        self.0.ends_with(USER_SUFFIX)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.ends_with(BROADCAST_SUFFIX)
    }

    pub fn is_status(&self) -> bool {
        self.0.contains("status")
    }

    /// Numeric id in front of the `@` suffix, if there is one.
    pub fn numeric_id(&self) -> Option<i64> {
        self.0.split('@').next()?.parse().ok()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Jid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Live message that just arrived.
    Notify,
    /// History sync or edit; never acted upon.
    Append,
    #[serde(other)]
    Other,
}

/// A batch of messages delivered by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

impl MessageUpdate {
    pub fn first(&self) -> Option<&InboundMessage> {
        self.messages.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: Option<Jid>,
    #[serde(default)]
    pub from_me: bool,
    pub id: Option<String>,
    /// Sender inside a group chat.
    pub participant: Option<Jid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub key: MessageKey,
    pub message: Option<MessageContent>,
    /// Unix seconds.
    #[serde(default)]
    pub message_timestamp: i64,
    pub push_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text_message: Option<ExtendedTextMessage>,
    pub image_message: Option<ImageMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessage {
    pub text: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMessage {
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    /// Id of the quoted message.
    pub stanza_id: Option<String>,
    pub participant: Option<Jid>,
}

fn non_empty(s: Option<&String>) -> Option<&str> {
    s.map(String::as_str).filter(|s| !s.is_empty())
}

impl MessageContent {
    /// Plain or extended text, ignoring image captions.
    pub fn text(&self) -> Option<&str> {
        non_empty(self.conversation.as_ref()).or_else(|| {
            self.extended_text_message
                .as_ref()
                .and_then(|ext| non_empty(ext.text.as_ref()))
        })
    }

    pub fn caption(&self) -> Option<&str> {
        self.image_message
            .as_ref()
            .and_then(|img| non_empty(img.caption.as_ref()))
    }

    /// Text if present, otherwise the image caption.
    pub fn body(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }

    pub fn context_info(&self) -> Option<&ContextInfo> {
        self.extended_text_message
            .as_ref()
            .and_then(|ext| ext.context_info.as_ref())
    }
}

impl InboundMessage {
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(MessageContent::text)
    }

    pub fn body(&self) -> Option<&str> {
        self.message.as_ref().and_then(MessageContent::body)
    }

    /// Id of the message this one quotes, if any.
    pub fn quoted_id(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(MessageContent::context_info)
            .and_then(|info| non_empty(info.stanza_id.as_ref()))
    }

    pub fn chat(&self) -> Option<&Jid> {
        self.key.remote_jid.as_ref()
    }

    /// Who to credit for this message: the group participant, or the chat itself.
    pub fn sender(&self) -> Option<&Jid> {
        self.key.participant.as_ref().or(self.key.remote_jid.as_ref())
    }
}
