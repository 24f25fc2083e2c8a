//! End-to-end tests for the bot session, driven through an in-memory client.

use super::*;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::bot::client::{
    ChatClient, ClientError, GroupMetadata, GroupSummary, OutgoingMessage, SentMessage,
};
use crate::bot::message::{Jid, MessageUpdate};
use crate::bot::session::{LIST_HEADER, NO_LIST_REPLY, NO_TEXT_REPLY};
use crate::completion::ReplyGenerator;
use crate::config::Retention;

// =============================================================================
// FIXTURES
// =============================================================================

const GROUP: i64 = -100;

fn group() -> Jid {
    Jid::group(GROUP)
}

fn bot_jid() -> Jid {
    Jid::user(999)
}

#[derive(Default)]
struct MockClient {
    sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
    pictures: Mutex<Vec<(Jid, usize)>>,
    groups: Vec<GroupSummary>,
    participants: Vec<Jid>,
    fail_sends: bool,
    next_id: AtomicUsize,
}

impl MockClient {
    fn sent(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, m)| m.text.or(m.caption))
            .collect()
    }
}

#[async_trait]
impl ChatClient for MockClient {
    async fn send(&self, jid: &Jid, message: OutgoingMessage) -> Result<SentMessage, ClientError> {
        if self.fail_sends {
            return Err(ClientError::Request("offline".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push((jid.clone(), message));
        Ok(SentMessage { id: format!("bot-{n}") })
    }

    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, ClientError> {
        Ok(GroupMetadata {
            subject: jid.to_string(),
            participants: self.participants.clone(),
        })
    }

    async fn list_groups(&self) -> Result<Vec<GroupSummary>, ClientError> {
        Ok(self.groups.clone())
    }

    async fn update_group_picture(&self, jid: &Jid, image: Vec<u8>) -> Result<(), ClientError> {
        self.pictures.lock().unwrap().push((jid.clone(), image.len()));
        Ok(())
    }
}

#[derive(Default)]
struct EchoGenerator {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate_reply(&self, prompt: &str) -> String {
        self.prompts.lock().unwrap().push(prompt.to_string());
        format!("resposta: {prompt}")
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        bot_jid: bot_jid(),
        command_marker: "!!".to_string(),
        target_group: group(),
        announcement_group: "Grupo teste".to_string(),
        timezone: chrono_tz::America::Fortaleza,
        image_path: None,
        picture_path: None,
        retention: Retention::default(),
    }
}

struct Harness {
    session: BotSession,
    client: Arc<MockClient>,
    generator: Arc<EchoGenerator>,
    tx: mpsc::UnboundedSender<BotEvent>,
    rx: mpsc::UnboundedReceiver<BotEvent>,
}

fn harness_with(client: MockClient, config: SessionConfig) -> Harness {
    let client = Arc::new(client);
    let generator = Arc::new(EchoGenerator::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let session = BotSession::new(config, client.clone(), generator.clone(), tx.clone());
    Harness { session, client, generator, tx, rx }
}

fn harness() -> Harness {
    harness_with(MockClient::default(), session_config())
}

impl Harness {
    /// Wait for a spawned reply to report back and feed it to the session.
    async fn settle(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("reply task should report back")
            .expect("queue open");
        self.session.handle(event).await;
    }
}

fn text_update(id: &str, text: &str, timestamp: i64) -> MessageUpdate {
    serde_json::from_value(serde_json::json!({
        "type": "notify",
        "messages": [{
            "key": { "remoteJid": group(), "fromMe": false, "id": id, "participant": "42@user" },
            "message": { "conversation": text },
            "messageTimestamp": timestamp,
            "pushName": "Joey"
        }]
    }))
    .unwrap()
}

fn reply_update(id: &str, text: &str, quoted: &str) -> MessageUpdate {
    serde_json::from_value(serde_json::json!({
        "type": "notify",
        "messages": [{
            "key": { "remoteJid": group(), "fromMe": false, "id": id, "participant": "42@user" },
            "message": {
                "extendedTextMessage": { "text": text, "contextInfo": { "stanzaId": quoted } }
            },
            "messageTimestamp": 50
        }]
    }))
    .unwrap()
}

// =============================================================================
// TOURNAMENT LISTS
// =============================================================================

mod tournament_lists {
    use super::*;

    #[tokio::test]
    async fn test_matching_message_is_stored() {
        let mut h = harness();
        h.session
            .handle(BotEvent::Message(text_update("m1", "Torneio João Pessoa - PB - Final", 10)))
            .await;

        let last = h.session.lists().last_tournament_list(&group()).unwrap();
        assert_eq!(last.text, "Torneio João Pessoa - PB - Final");
        assert_eq!(last.timestamp, 10);
        assert!(h.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_chatter_is_not_stored() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "oi", 10))).await;
        assert!(h.session.lists().last_tournament_list(&group()).is_none());
    }

    #[tokio::test]
    async fn test_latest_list_is_echoed() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "Torneio antigo", 10))).await;
        h.session.handle(BotEvent::Message(text_update("m2", "Torneio novo", 20))).await;
        h.session.handle(BotEvent::Message(text_update("m3", "!!lista", 30))).await;

        assert_eq!(h.client.texts(), vec![LIST_HEADER.to_string(), "Torneio novo".to_string()]);
        // both sends are tracked for reply detection
        assert!(h.session.sent_ids().contains("bot-0"));
        assert!(h.session.sent_ids().contains("bot-1"));
    }

    #[tokio::test]
    async fn test_list_command_without_list() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "!!lista", 30))).await;
        assert_eq!(h.client.texts(), vec![NO_LIST_REPLY.to_string()]);
    }

    #[tokio::test]
    async fn test_help_command() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "!!ajuda", 30))).await;
        let texts = h.client.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("!!lista"));
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "!!foo", 30))).await;
        h.session.handle(BotEvent::Message(text_update("m2", "Bora!!", 31))).await;
        assert!(h.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_list_with_exclamations_is_stored() {
        let mut h = harness();
        let list = "Torneio de sábado!!\n1. Yugi\n2. Kaiba";
        h.session.handle(BotEvent::Message(text_update("m1", list, 10))).await;

        let last = h.session.lists().last_tournament_list(&group()).unwrap();
        assert_eq!(last.text, list);
        assert!(h.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_command_is_not_stored_as_list() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "Torneio !!lista", 30))).await;
        assert!(h.session.lists().last_tournament_list(&group()).is_none());
    }
}

// =============================================================================
// REPLIES
// =============================================================================

mod replies {
    use super::*;

    #[tokio::test]
    async fn test_reply_to_bot_message_gets_generated_answer() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "!!ajuda", 1))).await;
        let help_id = "bot-0";
        assert!(h.session.sent_ids().contains(help_id));

        h.session
            .handle(BotEvent::Message(reply_update("m2", "quando é o torneio?", help_id)))
            .await;
        h.settle().await;

        assert_eq!(*h.generator.prompts.lock().unwrap(), vec!["quando é o torneio?".to_string()]);
        let (jid, reply) = h.client.sent().pop().unwrap();
        assert_eq!(jid, group());
        assert_eq!(reply.text.as_deref(), Some("resposta: quando é o torneio?"));
        let quote = reply.quoted.unwrap();
        assert_eq!(quote.id, "m2");
        assert_eq!(quote.participant, Jid::user(42));

        // the reply itself can be replied to
        assert!(h.session.sent_ids().contains("bot-1"));
    }

    #[tokio::test]
    async fn test_reply_to_unknown_message_is_ignored() {
        let mut h = harness();
        h.session
            .handle(BotEvent::Message(reply_update("m2", "quem?", "someone-else")))
            .await;

        assert!(h.client.sent().is_empty());
        assert!(h.generator.prompts.lock().unwrap().is_empty());
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reply_without_text_gets_fixed_answer() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "!!ajuda", 1))).await;

        let update: MessageUpdate = serde_json::from_value(serde_json::json!({
            "type": "notify",
            "messages": [{
                "key": { "remoteJid": group(), "id": "m3" },
                "message": {
                    "imageMessage": { "caption": "olha isso" },
                    "extendedTextMessage": { "contextInfo": { "stanzaId": "bot-0" } }
                },
                "messageTimestamp": 5
            }]
        }))
        .unwrap();
        h.session.handle(BotEvent::Message(update)).await;
        h.settle().await;

        assert_eq!(h.client.texts().last().map(String::as_str), Some(NO_TEXT_REPLY));
        assert!(h.generator.prompts.lock().unwrap().is_empty());
    }
}

// =============================================================================
// VALIDITY
// =============================================================================

mod validity {
    use super::*;

    #[tokio::test]
    async fn test_append_updates_are_ignored() {
        let mut h = harness();
        let mut update = text_update("m1", "!!lista", 1);
        update.kind = UpdateKind::Append;
        h.session.handle(BotEvent::Message(update)).await;
        assert!(h.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_own_broadcast_is_ignored() {
        let mut h = harness();
        let update: MessageUpdate = serde_json::from_value(serde_json::json!({
            "type": "notify",
            "messages": [{
                "key": { "remoteJid": "-7@broadcast", "fromMe": true, "id": "x" },
                "message": { "conversation": "Torneio de domingo" },
                "messageTimestamp": 5
            }]
        }))
        .unwrap();
        h.session.handle(BotEvent::Message(update)).await;
        assert!(h.session.lists().last_tournament_list(&Jid::new("-7@broadcast")).is_none());
    }

    #[tokio::test]
    async fn test_failed_send_is_not_tracked() {
        let mut h = harness_with(
            MockClient { fail_sends: true, ..Default::default() },
            session_config(),
        );
        h.session.handle(BotEvent::Message(text_update("m1", "!!ajuda", 1))).await;
        assert!(h.session.sent_ids().is_empty());
    }
}

// =============================================================================
// SCHEDULED JOBS
// =============================================================================

mod jobs {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_daily_reminder_mentions_everyone_then_sends_list() {
        let client = MockClient {
            participants: vec![Jid::user(1), Jid::user(2)],
            ..Default::default()
        };
        let mut h = harness_with(client, session_config());
        h.session.handle(BotEvent::Message(text_update("m1", "Torneio Sábado\n1. Yugi", 10))).await;

        h.session.handle(BotEvent::Job(JobKind::DailyReminder)).await;

        let sent = h.client.sent();
        assert_eq!(sent.len(), 3);
        let (jid, broadcast) = &sent[0];
        assert_eq!(jid, &group());
        assert_eq!(broadcast.mentions, vec![Jid::user(1), Jid::user(2)]);
        assert!(broadcast.image.is_none());
        assert!(broadcast.text.as_deref().unwrap().contains("torneio"));
        assert_eq!(sent[1].1.text.as_deref(), Some(LIST_HEADER));
        assert_eq!(sent[2].1.text.as_deref(), Some("Torneio Sábado\n1. Yugi"));
        assert_eq!(h.session.sent_ids().len(), 3);
    }

    #[tokio::test]
    async fn test_daily_reminder_without_list() {
        let mut h = harness();
        h.session.handle(BotEvent::Job(JobKind::DailyReminder)).await;
        assert_eq!(h.client.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_attaches_image() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(b"\xFF\xD8fake-jpeg").unwrap();
        let config = SessionConfig {
            image_path: Some(image.path().to_path_buf()),
            ..session_config()
        };
        let mut h = harness_with(MockClient::default(), config);

        h.session.handle(BotEvent::Job(JobKind::DailyReminder)).await;

        let (_, broadcast) = h.client.sent().remove(0);
        assert_eq!(broadcast.image.as_deref(), Some(&b"\xFF\xD8fake-jpeg"[..]));
        assert!(broadcast.caption.is_some());
        assert!(broadcast.text.is_none());
    }

    #[tokio::test]
    async fn test_missing_image_falls_back_to_text() {
        let config = SessionConfig {
            image_path: Some("/nonexistent/yugi.jpg".into()),
            ..session_config()
        };
        let mut h = harness_with(MockClient::default(), config);
        h.session.handle(BotEvent::Job(JobKind::DailyReminder)).await;

        let (_, broadcast) = h.client.sent().remove(0);
        assert!(broadcast.image.is_none());
        assert!(broadcast.text.is_some());
    }

    #[tokio::test]
    async fn test_announcement_resolves_group_by_name() {
        let client = MockClient {
            groups: vec![
                GroupSummary { jid: Jid::group(-1), subject: "Outro grupo".into() },
                GroupSummary { jid: Jid::group(-2), subject: "Grupo teste".into() },
            ],
            ..Default::default()
        };
        let mut h = harness_with(client, session_config());
        h.session.handle(BotEvent::Job(JobKind::Announcement)).await;

        let sent = h.client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Jid::group(-2));
    }

    #[tokio::test]
    async fn test_announcement_unknown_group_sends_nothing() {
        let mut h = harness();
        h.session.handle(BotEvent::Job(JobKind::Announcement)).await;
        assert!(h.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_group_picture_job() {
        let mut picture = tempfile::NamedTempFile::new().unwrap();
        picture.write_all(&[1, 2, 3, 4]).unwrap();
        let config = SessionConfig {
            picture_path: Some(picture.path().to_path_buf()),
            ..session_config()
        };
        let mut h = harness_with(MockClient::default(), config);
        h.session.handle(BotEvent::Job(JobKind::GroupPicture)).await;

        assert_eq!(*h.client.pictures.lock().unwrap(), vec![(group(), 4)]);
    }

    #[tokio::test]
    async fn test_group_picture_without_path_is_harmless() {
        let mut h = harness();
        h.session.handle(BotEvent::Job(JobKind::GroupPicture)).await;
        assert!(h.client.pictures.lock().unwrap().is_empty());
    }
}

// =============================================================================
// EVENT LOOP
// =============================================================================

mod event_loop {
    use super::*;

    #[tokio::test]
    async fn test_run_stops_when_senders_drop() {
        let client = Arc::new(MockClient::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = BotSession::new(
            session_config(),
            client.clone(),
            Arc::new(EchoGenerator::default()),
            tx.clone(),
        );
        tx.send(BotEvent::Message(text_update("m1", "!!ajuda", 1))).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), session.run(rx))
            .await
            .expect("session should stop once the queue is drained");
        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_after_queue_closed_is_dropped() {
        let mut h = harness();
        h.session.handle(BotEvent::Message(text_update("m1", "!!ajuda", 1))).await;
        drop(h.tx);
        h.session
            .handle(BotEvent::Message(reply_update("m2", "oi bot", "bot-0")))
            .await;

        assert_eq!(h.client.sent().len(), 1);
        assert!(h.generator.prompts.lock().unwrap().is_empty());
    }
}
