//! Bot module - classifies group messages and runs the scheduled broadcasts.

pub mod broadcast;
pub mod client;
pub mod message;
pub mod schedule;
pub mod session;
pub mod store;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use message::UpdateKind;
pub use session::{BotEvent, BotSession, JobKind, SessionConfig};
pub use telegram::TelegramClient;
