//! Cron-driven job triggers.

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bot::session::{BotEvent, JobKind};

/// Parse a cron expression (7 fields: sec min hour day month dow year).
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    Schedule::from_str(expr).map_err(|e| format!("Invalid cron: {}", e))
}

/// Validate cron expression.
pub fn validate_cron(expr: &str) -> Result<(), String> {
    parse_cron(expr).map(|_| ())
}

/// Post `job` into the event queue at every occurrence of `schedule` in `tz`.
///
/// The task ends when the queue is closed or the schedule runs out.
pub fn spawn_job(
    schedule: Schedule,
    tz: Tz,
    job: JobKind,
    events: UnboundedSender<BotEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now().with_timezone(&tz);
            let Some(next) = schedule.after(&now).next() else {
                warn!("No future occurrence for {:?}, stopping", job);
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!("⏰ {:?} scheduled for {}", job, next);
            tokio::time::sleep(wait).await;

            if events.send(BotEvent::Job(job)).is_err() {
                info!("Event queue closed, stopping {:?}", job);
                break;
            }
        }
    })
}
