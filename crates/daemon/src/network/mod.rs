//! Network module for the chat transport.
//!
//! Only the Telegram Bot API over HTTPS long polling is supported.

pub mod telegram;

pub use telegram::{ApiError, BotApi};
