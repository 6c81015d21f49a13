//! Telegram Bot channel — long polling + message sending via Bot API.

use async_trait::async_trait;
use serde::Deserialize;

use minder_core::{Delivery, MinderError, Result};

/// A text message received from Telegram, reduced to what the command
/// layer needs.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub text: String,
}

/// Telegram Bot channel. `get_updates` mutates the polling offset, so the
/// polling loop owns the channel mutably; delivery goes through a cloned
/// `TelegramSender`.
pub struct TelegramChannel {
    bot_token: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    last_update_id: i64,
}

impl TelegramChannel {
    pub fn new(bot_token: String, poll_timeout_secs: u64) -> Self {
        Self {
            bot_token,
            poll_timeout_secs,
            client: reqwest::Client::new(),
            last_update_id: 0,
        }
    }

    /// A cheap cloneable handle for sending only.
    pub fn sender(&self) -> TelegramSender {
        TelegramSender {
            bot_token: self.bot_token.clone(),
            client: self.client.clone(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Long-poll for updates; advances the internal offset past everything
    /// returned so the same update is never seen twice.
    pub async fn get_updates(&mut self) -> Result<Vec<IncomingMessage>> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", (self.last_update_id + 1).to_string()),
                ("timeout", self.poll_timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".into()),
            ])
            .send()
            .await
            .map_err(|e| MinderError::Channel(format!("Telegram getUpdates failed: {e}")))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| MinderError::Channel(format!("Invalid Telegram response: {e}")))?;

        if !body.ok {
            return Err(MinderError::Channel(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id = last.update_id;
        }
        Ok(updates.iter().filter_map(TelegramUpdate::to_incoming).collect())
    }

    /// Verify the token by asking the API who we are.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| MinderError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| MinderError::Channel(format!("Invalid getMe response: {e}")))?;
        body.result
            .ok_or_else(|| MinderError::Channel("No bot info".into()))
    }
}

/// Send-only handle, cloneable across tasks.
#[derive(Clone)]
pub struct TelegramSender {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramSender {
    /// Send a plain-text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(api_url(&self.bot_token, "sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| MinderError::Channel(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| MinderError::Channel(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(MinderError::Channel(format!(
                "Send failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for TelegramSender {
    async fn send(&self, destination: i64, text: &str) -> Result<()> {
        self.send_message(destination, text).await
    }
}

fn api_url(token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{token}/{method}")
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

impl TelegramUpdate {
    fn to_incoming(&self) -> Option<IncomingMessage> {
        let msg = self.message.as_ref()?;
        let text = msg.text.as_ref()?;
        let from = msg.from.as_ref()?;

        if from.is_bot {
            return None;
        }

        Some(IncomingMessage {
            chat_id: msg.chat.id,
            sender_id: from.id,
            sender_name: match from.last_name.as_deref() {
                Some(last) => format!("{} {last}", from.first_name),
                None => from.first_name.clone(),
            },
            text: text.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_to_incoming() {
        let raw = r#"{
            "update_id": 42,
            "message": {
                "message_id": 1,
                "from": {"id": 7, "is_bot": false, "first_name": "Ada", "last_name": "L"},
                "chat": {"id": 99, "type": "private"},
                "text": "/rem_list",
                "date": 1700000000
            }
        }"#;
        let update: TelegramUpdate = serde_json::from_str(raw).unwrap();
        let msg = update.to_incoming().unwrap();
        assert_eq!(msg.chat_id, 99);
        assert_eq!(msg.sender_id, 7);
        assert_eq!(msg.sender_name, "Ada L");
        assert_eq!(msg.text, "/rem_list");
    }

    #[test]
    fn test_bot_messages_ignored() {
        let raw = r#"{
            "update_id": 43,
            "message": {
                "message_id": 2,
                "from": {"id": 8, "is_bot": true, "first_name": "SomeBot"},
                "chat": {"id": 99, "type": "private"},
                "text": "hi",
                "date": 1700000000
            }
        }"#;
        let update: TelegramUpdate = serde_json::from_str(raw).unwrap();
        assert!(update.to_incoming().is_none());
    }

    #[test]
    fn test_sender_is_a_delivery_at_the_crate_root() {
        fn assert_delivery<T: minder_core::Delivery>() {}
        assert_delivery::<crate::TelegramSender>();
    }

    #[test]
    fn test_non_text_update_skipped() {
        let raw = r#"{"update_id": 44, "message": null}"#;
        let update: TelegramUpdate = serde_json::from_str(raw).unwrap();
        assert!(update.to_incoming().is_none());
    }
}
