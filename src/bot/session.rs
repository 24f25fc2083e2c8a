//! Bot session - owns the caches and reacts to queued events.
//!
//! Transport handlers and cron tasks only push [`BotEvent`]s. The session
//! task is the single consumer, so the caches need no locking. Reply
//! generation is the one slow path: it runs in a spawned task and reports
//! the delivered message back through the same queue.

use chrono::{Datelike, Utc, Weekday};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bot::client::{ChatClient, ClientError, OutgoingMessage, Quote, SentMessage};
use crate::bot::message::{InboundMessage, Jid, MessageUpdate};
use crate::bot::store::{SentMessageIds, TournamentListStore};
use crate::classifier::{is_command_message, is_message_reply, is_message_valid};
use crate::completion::ReplyGenerator;
use crate::config::Retention;

/// Sent instead of a generated reply when the quoting message has no text.
pub const NO_TEXT_REPLY: &str = "Opa, não entendi sua mensagem!";
pub const LIST_HEADER: &str = "Aqui vai a lista atualizada:";
pub const NO_LIST_REPLY: &str = "Ainda não tenho nenhuma lista de torneio desse grupo.";

/// Scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    DailyReminder,
    Announcement,
    GroupPicture,
}

pub enum BotEvent {
    Message(MessageUpdate),
    /// A spawned task delivered a message; its id must be tracked.
    Delivered(SentMessage),
    Job(JobKind),
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The bot's own identifier.
    pub bot_jid: Jid,
    pub command_marker: String,
    /// Group that receives the daily reminder.
    pub target_group: Jid,
    /// Display name of the announcement group.
    pub announcement_group: String,
    pub timezone: Tz,
    pub image_path: Option<PathBuf>,
    pub picture_path: Option<PathBuf>,
    pub retention: Retention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    Help,
}

impl Command {
    /// The word right after the marker decides the command. Anything else
    /// (`Bora!!`, `Torneio!! 1. ...`) is ordinary text.
    pub fn parse(text: &str, marker: &str) -> Option<Self> {
        let (_, rest) = text.split_once(marker)?;
        let word = rest.split_whitespace().next()?.to_lowercase();
        match word.as_str() {
            "lista" => Some(Self::List),
            "ajuda" | "help" => Some(Self::Help),
            _ => None,
        }
    }
}

fn help_text(marker: &str) -> String {
    format!(
        "Comandos disponíveis:\n{marker}lista - mostra a última lista de torneio do grupo\n{marker}ajuda - mostra esta mensagem"
    )
}

pub struct BotSession {
    pub(crate) config: SessionConfig,
    pub(crate) client: Arc<dyn ChatClient>,
    generator: Arc<dyn ReplyGenerator>,
    events: mpsc::WeakUnboundedSender<BotEvent>,
    sent: SentMessageIds,
    lists: TournamentListStore,
}

impl BotSession {
    pub fn new(
        config: SessionConfig,
        client: Arc<dyn ChatClient>,
        generator: Arc<dyn ReplyGenerator>,
        events: mpsc::UnboundedSender<BotEvent>,
    ) -> Self {
        let sent = SentMessageIds::with_capacity(config.retention.sent_message_ids);
        let lists = TournamentListStore::new(config.retention.lists_per_group);
        Self {
            config,
            client,
            generator,
            events: events.downgrade(),
            sent,
            lists,
        }
    }

    /// Consume events until the transport and the cron tasks drop their senders.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BotEvent>) {
        info!("🤖 Session started (bot {})", self.config.bot_jid);
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        info!("Event queue closed, session stopped");
    }

    pub async fn handle(&mut self, event: BotEvent) {
        match event {
            BotEvent::Message(update) => self.handle_update(update).await,
            BotEvent::Delivered(sent) => {
                self.sent.insert(sent.id);
            }
            BotEvent::Job(kind) => {
                info!("⏰ Running {:?}", kind);
                let result = match kind {
                    JobKind::DailyReminder => self.daily_reminder().await,
                    JobKind::Announcement => self.announcement().await,
                    JobKind::GroupPicture => self.refresh_group_picture().await,
                };
                if let Err(e) = result {
                    error!("❌ {:?} failed: {}", kind, e);
                }
            }
        }
    }

    async fn handle_update(&mut self, update: MessageUpdate) {
        if !is_message_valid(&update, &self.config.bot_jid) {
            debug!("Skipping update ({:?}, {} message(s))", update.kind, update.messages.len());
            return;
        }
        let Some(msg) = update.messages.into_iter().next() else {
            return;
        };
        let Some(chat) = msg.chat().cloned() else {
            return;
        };
        let text = msg.body().unwrap_or_default().to_string();
        info!(
            "📨 {} in {}: \"{}\"",
            msg.push_name.as_deref().unwrap_or("unknown"),
            chat,
            text.chars().take(50).collect::<String>()
        );

        let marker = &self.config.command_marker;
        let command = is_command_message(&text, marker)
            .then(|| Command::parse(&text, marker))
            .flatten();

        if is_message_reply(&msg, &self.sent) {
            self.spawn_reply(msg, chat);
        } else if let Some(command) = command {
            self.run_command(&chat, command).await;
        } else if self.lists.store_if_tournament_list(&msg, &chat) {
            info!("🏆 Stored tournament list for {} ({} kept)", chat, self.lists.len(&chat));
        }
    }

    /// Generate and send a reply without blocking the queue.
    fn spawn_reply(&self, msg: InboundMessage, chat: Jid) {
        let client = self.client.clone();
        let generator = self.generator.clone();
        let Some(events) = self.events.upgrade() else {
            warn!("Event queue closed, not replying in {}", chat);
            return;
        };

        tokio::spawn(async move {
            let text = match msg.text() {
                Some(prompt) => generator.generate_reply(prompt).await,
                None => NO_TEXT_REPLY.to_string(),
            };
            let mut outgoing = OutgoingMessage::text(text);
            if let Some(id) = msg.key.id.clone() {
                let participant = msg.sender().cloned().unwrap_or_else(|| chat.clone());
                outgoing = outgoing.quoting(Quote { id, participant });
            }

            match client.send(&chat, outgoing).await {
                Ok(sent) => {
                    info!("💬 Replied in {} (msg {})", chat, sent.id);
                    if events.send(BotEvent::Delivered(sent)).is_err() {
                        warn!("Event queue closed, reply id not tracked");
                    }
                }
                Err(e) => warn!("Failed to send reply: {e}"),
            }
        });
    }

    async fn run_command(&mut self, chat: &Jid, command: Command) {
        info!("⚙️ Command {:?} in {}", command, chat);
        let result = match command {
            Command::List => self.send_last_list(chat, false).await,
            Command::Help => {
                let help = help_text(&self.config.command_marker);
                self.send_and_track(chat, OutgoingMessage::text(help)).await.map(|_| ())
            }
        };
        if let Err(e) = result {
            warn!("Command failed in {}: {}", chat, e);
        }
    }

    /// Send the header and the most recent list. With `quiet`, nothing is
    /// sent when no list is known.
    pub(crate) async fn send_last_list(&mut self, chat: &Jid, quiet: bool) -> Result<(), ClientError> {
        let Some(text) = self.lists.last_tournament_list(chat).map(|e| e.text.clone()) else {
            if !quiet {
                self.send_and_track(chat, OutgoingMessage::text(NO_LIST_REPLY)).await?;
            }
            return Ok(());
        };
        self.send_and_track(chat, OutgoingMessage::text(LIST_HEADER)).await?;
        self.send_and_track(chat, OutgoingMessage::text(text)).await?;
        Ok(())
    }

    /// Send and remember the id so replies to it are recognised.
    pub(crate) async fn send_and_track(
        &mut self,
        jid: &Jid,
        message: OutgoingMessage,
    ) -> Result<SentMessage, ClientError> {
        let sent = self.client.send(jid, message).await?;
        self.sent.insert(sent.id.clone());
        Ok(sent)
    }

    /// Current weekday in the configured time zone.
    pub(crate) fn today(&self) -> Weekday {
        Utc::now().with_timezone(&self.config.timezone).weekday()
    }

    #[cfg(test)]
    pub fn sent_ids(&self) -> &SentMessageIds {
        &self.sent
    }

    #[cfg(test)]
    pub fn lists(&self) -> &TournamentListStore {
        &self.lists
    }
}
