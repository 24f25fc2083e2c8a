//! Seam between the bot and the messaging client.

use async_trait::async_trait;
use std::fmt;

use crate::bot::message::Jid;

/// Message being quoted by an outgoing reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub id: String,
    pub participant: Jid,
}

/// Outgoing content: text, or an image with an optional caption.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
    pub caption: Option<String>,
    pub quoted: Option<Quote>,
    pub mentions: Vec<Jid>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn image(data: Vec<u8>, caption: impl Into<String>) -> Self {
        Self {
            image: Some(data),
            caption: Some(caption.into()),
            ..Default::default()
        }
    }

    pub fn quoting(mut self, quote: Quote) -> Self {
        self.quoted = Some(quote);
        self
    }

    pub fn mentioning(mut self, mentions: Vec<Jid>) -> Self {
        self.mentions = mentions;
        self
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct GroupMetadata {
    pub subject: String,
    pub participants: Vec<Jid>,
}

#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub jid: Jid,
    pub subject: String,
}

#[derive(Debug)]
pub enum ClientError {
    /// The identifier cannot be mapped onto the transport.
    InvalidJid(String),
    InvalidMessageId(String),
    /// Nothing to send.
    EmptyMessage,
    Request(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJid(jid) => write!(f, "invalid jid '{jid}'"),
            Self::InvalidMessageId(id) => write!(f, "invalid message id '{id}'"),
            Self::EmptyMessage => write!(f, "message has no content"),
            Self::Request(e) => write!(f, "request failed: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Operations the bot needs from the messaging client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, jid: &Jid, message: OutgoingMessage) -> Result<SentMessage, ClientError>;

    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, ClientError>;

    /// Groups the account participates in.
    async fn list_groups(&self) -> Result<Vec<GroupSummary>, ClientError>;

    async fn update_group_picture(&self, jid: &Jid, image: Vec<u8>) -> Result<(), ClientError>;
}

/// Resolve a group by its display name.
pub async fn find_group_by_name(
    client: &dyn ChatClient,
    name: &str,
) -> Result<Option<Jid>, ClientError> {
    let groups = client.list_groups().await?;
    Ok(groups.into_iter().find(|g| g.subject == name).map(|g| g.jid))
}
