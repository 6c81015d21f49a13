//! # Minder Channels
//!
//! The bot's only channel is Telegram: long polling in, Bot API sends out.

pub mod telegram;

pub use telegram::{IncomingMessage, TelegramChannel, TelegramSender};
