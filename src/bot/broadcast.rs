//! Scheduled broadcasts to whole groups.

use chrono::Weekday;
use tracing::{info, warn};

use crate::bot::client::{find_group_by_name, OutgoingMessage};
use crate::bot::message::Jid;
use crate::bot::session::BotSession;

const FRIDAY_CAPTION: &str = "BOM DIA BOM DIA! YUGINHO JOTAPINHO Passando pra avisar que SEXTOU! Amanhã tem torneio, lembre-se de colocar o nome na lista pra mostrar pra galera que o torneio vai bombar!";
const DEFAULT_CAPTION: &str = "Fala, Duelistas! YUGINHO JOTAPINHO Passando pra avisar que SÁBADO tem torneio! Lembre-se de colocar o nome na lista pra mostrar pra galera que o torneio vai bombar!";

/// Broadcast caption for the given day.
pub fn caption_for(day: Weekday) -> &'static str {
    match day {
        Weekday::Fri => FRIDAY_CAPTION,
        _ => DEFAULT_CAPTION,
    }
}

impl BotSession {
    /// Send the day's caption to `group`, mentioning every participant.
    pub(crate) async fn send_to_all(&mut self, group: &Jid) -> Result<(), String> {
        let metadata = self
            .client
            .group_metadata(group)
            .await
            .map_err(|e| format!("Failed to fetch metadata for {group}: {e}"))?;

        let caption = caption_for(self.today());
        let message = match self.broadcast_image().await {
            Some(image) => OutgoingMessage::image(image, caption),
            None => OutgoingMessage::text(caption),
        };
        let mentions = metadata.participants.len();

        let sent = self
            .send_and_track(group, message.mentioning(metadata.participants))
            .await
            .map_err(|e| format!("Failed to broadcast to {group}: {e}"))?;
        info!("📣 Broadcast to {} \"{}\" ({} mentions, msg {})", group, metadata.subject, mentions, sent.id);
        Ok(())
    }

    /// Reminder to the target group, followed by its latest tournament list.
    pub(crate) async fn daily_reminder(&mut self) -> Result<(), String> {
        let group = self.config.target_group.clone();
        self.send_to_all(&group).await?;
        self.send_last_list(&group, true)
            .await
            .map_err(|e| format!("Failed to send list to {group}: {e}"))
    }

    /// Announcement to the group named in the configuration.
    pub(crate) async fn announcement(&mut self) -> Result<(), String> {
        let name = self.config.announcement_group.clone();
        let group = find_group_by_name(self.client.as_ref(), &name)
            .await
            .map_err(|e| format!("Failed to list groups: {e}"))?
            .ok_or_else(|| format!("No group named \"{name}\""))?;
        self.send_to_all(&group).await
    }

    /// Replace the target group's picture with the configured image.
    pub(crate) async fn refresh_group_picture(&mut self) -> Result<(), String> {
        let path = self
            .config
            .picture_path
            .clone()
            .ok_or("No group picture configured")?;
        let image = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;

        let group = &self.config.target_group;
        self.client
            .update_group_picture(group, image)
            .await
            .map_err(|e| format!("Failed to update picture of {group}: {e}"))?;
        info!("🖼️ Updated picture of {}", group);
        Ok(())
    }

    /// Configured broadcast image; text-only when missing or unreadable.
    async fn broadcast_image(&self) -> Option<Vec<u8>> {
        let path = self.config.image_path.as_ref()?;
        match tokio::fs::read(path).await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Failed to read broadcast image {}: {e}", path.display());
                None
            }
        }
    }
}
