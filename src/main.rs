mod bot;
mod classifier;
mod completion;
mod config;

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::{ApiError, RequestError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use bot::schedule::{parse_cron, spawn_job};
use bot::{BotEvent, BotSession, JobKind, SessionConfig, TelegramClient, UpdateKind};
use completion::Client as CompletionClient;
use config::Config;

struct HandlerState {
    telegram: Arc<TelegramClient>,
    events: mpsc::UnboundedSender<BotEvent>,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "calango.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::never(&log_dir, "calango.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    // Panics inside tasks are contained by tokio; just make them visible.
    std::panic::set_hook(Box::new(|panic| {
        error!("Unhandled panic: {panic}");
    }));

    info!("🚀 Starting calango...");
    info!("Loaded config from {}", config.config_path.display());
    info!("Target group: {}", config.target_group);

    let bot = Bot::new(&config.telegram_bot_token);
    let me = match connect(&bot, config.reconnect_delay).await {
        Ok(me) => me,
        Err(e) => {
            error!("Not authenticated, giving up: {e}");
            std::process::exit(1);
        }
    };
    info!("📱 Connected as @{} ({})", me.username(), me.id);

    let telegram = Arc::new(TelegramClient::new(bot.clone(), me.id));
    let completion = match CompletionClient::new(config.completion.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build completion client: {e}");
            std::process::exit(1);
        }
    };

    let session_config = SessionConfig {
        bot_jid: telegram.bot_jid(),
        command_marker: config.command_marker.clone(),
        target_group: config.target_group.clone(),
        announcement_group: config.announcement_group.clone(),
        timezone: config.timezone,
        image_path: config.image_path.clone(),
        picture_path: config.picture.as_ref().map(|p| p.path.clone()),
        retention: config.retention,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let session = BotSession::new(session_config, telegram.clone(), completion, tx.clone());
    tokio::spawn(session.run(rx));

    let mut jobs = vec![
        (config.reminder_cron.as_str(), JobKind::DailyReminder),
        (config.announcement_cron.as_str(), JobKind::Announcement),
    ];
    if let Some(ref picture) = config.picture {
        jobs.push((picture.cron.as_str(), JobKind::GroupPicture));
    }
    for (expr, job) in jobs {
        match parse_cron(expr) {
            Ok(schedule) => {
                spawn_job(schedule, config.timezone, job, tx.clone());
            }
            Err(e) => warn!("Not scheduling {:?}: {}", job, e),
        }
    }

    let state = Arc::new(HandlerState { telegram, events: tx });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_new_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("👋 Shutting down");
}

/// Identify the bot, retrying until Telegram is reachable.
///
/// A rejected token is terminal; anything else is retried after `delay`.
async fn connect(bot: &Bot, delay: Duration) -> Result<Me, RequestError> {
    loop {
        match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(e @ RequestError::Api(ApiError::InvalidToken)) => return Err(e),
            Err(e) => {
                warn!("Failed to reach Telegram: {e}, retrying in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn handle_new_message(msg: Message, state: Arc<HandlerState>) -> ResponseResult<()> {
    forward(&msg, UpdateKind::Notify, &state);
    Ok(())
}

async fn handle_edited_message(msg: Message, state: Arc<HandlerState>) -> ResponseResult<()> {
    forward(&msg, UpdateKind::Append, &state);
    Ok(())
}

fn forward(msg: &Message, kind: UpdateKind, state: &HandlerState) {
    state.telegram.observe(msg);
    let update = state.telegram.to_update(msg, kind);
    if state.events.send(BotEvent::Message(update)).is_err() {
        warn!("Session stopped, dropping message {}", msg.id.0);
    }
}
