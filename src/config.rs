use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bot::message::Jid;
use crate::bot::schedule::validate_cron;
use crate::classifier::COMMAND_MARKER;

/// Environment variable that overrides `target_group`.
pub const TARGET_GROUP_ENV: &str = "BOT_TARGET_GROUP";
/// Environment variables that fill in the completion credentials.
pub const COMPLETION_KEY_ENV: &str = "HF_TOKEN";
pub const COMPLETION_URL_ENV: &str = "HF_BASE_URL";
/// Used when neither the file nor the environment names an endpoint.
pub const DEFAULT_COMPLETION_URL: &str = "https://router.huggingface.co/v1";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid cron expression.
    InvalidCron { field: &'static str, reason: String },
    /// Unknown IANA time zone.
    InvalidTimezone(String),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidCron { field, reason } => write!(f, "invalid {}: {}", field, reason),
            Self::InvalidTimezone(tz) => write!(f, "unknown time zone '{}'", tz),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidCron { .. } | Self::InvalidTimezone(_) | Self::Validation(_) => None,
        }
    }
}

/// Settings for the chat-completions endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "moonshotai/Kimi-K2-Instruct-0905".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            timeout_secs: 60,
        }
    }
}

/// Upper bounds for the in-memory caches.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub sent_message_ids: usize,
    pub lists_per_group: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            sent_message_ids: 10_000,
            lists_per_group: 50,
        }
    }
}

/// Periodic replacement of the target group's picture.
#[derive(Debug, Clone, Deserialize)]
pub struct PictureJob {
    pub cron: String,
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Group that receives the daily reminder. `BOT_TARGET_GROUP` wins over this.
    target_group: Option<String>,
    /// Display name of the group that receives the announcement.
    #[serde(default = "default_announcement_group")]
    announcement_group: String,
    #[serde(default = "default_reminder_cron")]
    reminder_cron: String,
    #[serde(default = "default_announcement_cron")]
    announcement_cron: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    /// Image attached to broadcasts.
    image_path: Option<String>,
    picture: Option<PictureJob>,
    #[serde(default = "default_command_marker")]
    command_marker: String,
    #[serde(default)]
    completion: CompletionConfig,
    #[serde(default)]
    retention: Retention,
    #[serde(default = "default_reconnect_delay_secs")]
    reconnect_delay_secs: u64,
    /// Directory for logs. Defaults to current directory.
    data_dir: Option<String>,
}

fn default_announcement_group() -> String {
    "Grupo teste".to_string()
}

fn default_reminder_cron() -> String {
    "0 0 9 * * * *".to_string()
}

fn default_announcement_cron() -> String {
    "0 0 18 * * Fri *".to_string()
}

fn default_timezone() -> String {
    "America/Fortaleza".to_string()
}

fn default_command_marker() -> String {
    COMMAND_MARKER.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

pub struct Config {
    /// Path to the config file.
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub target_group: Jid,
    pub announcement_group: String,
    pub reminder_cron: String,
    pub announcement_cron: String,
    pub timezone: Tz,
    pub image_path: Option<PathBuf>,
    pub picture: Option<PictureJob>,
    pub command_marker: String,
    pub completion: CompletionConfig,
    pub retention: Retention,
    pub reconnect_delay: Duration,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let mut file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }

        let target_group = env(TARGET_GROUP_ENV)
            .filter(|v| !v.trim().is_empty())
            .or(file.target_group.take())
            .map(|v| parse_group(v.trim()))
            .ok_or_else(|| {
                ConfigError::Validation(format!("target_group is required (or set {TARGET_GROUP_ENV})"))
            })?;

        validate_cron(&file.reminder_cron)
            .map_err(|reason| ConfigError::InvalidCron { field: "reminder_cron", reason })?;
        validate_cron(&file.announcement_cron)
            .map_err(|reason| ConfigError::InvalidCron { field: "announcement_cron", reason })?;
        if let Some(ref picture) = file.picture {
            validate_cron(&picture.cron)
                .map_err(|reason| ConfigError::InvalidCron { field: "picture.cron", reason })?;
        }

        let timezone: Tz = file
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(file.timezone.clone()))?;

        if file.command_marker.is_empty() {
            return Err(ConfigError::Validation("command_marker must not be empty".into()));
        }

        let mut completion = file.completion;
        if !(0.0..=2.0).contains(&completion.temperature) {
            return Err(ConfigError::Validation(
                "completion.temperature must be between 0 and 2".into(),
            ));
        }
        if completion.api_key.is_empty() {
            completion.api_key = env(COMPLETION_KEY_ENV).unwrap_or_default();
        }
        if completion.base_url.is_empty() {
            completion.base_url = env(COMPLETION_URL_ENV)
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_string());
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            target_group,
            announcement_group: file.announcement_group,
            reminder_cron: file.reminder_cron,
            announcement_cron: file.announcement_cron,
            timezone,
            image_path: file.image_path.map(PathBuf::from),
            picture: file.picture,
            command_marker: file.command_marker,
            completion,
            retention: file.retention,
            reconnect_delay: Duration::from_secs(file.reconnect_delay_secs),
            data_dir,
        })
    }
}

/// A bare numeric chat id is taken to be a group.
fn parse_group(value: &str) -> Jid {
    match value.parse::<i64>() {
        Ok(id) => Jid::group(id),
        Err(_) => Jid::new(value),
    }
}
