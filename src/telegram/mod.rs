use std::time::Duration;

use log::error;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
}

/// An incoming chat message that may start a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub chat_id: i64,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub channel_post: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Update {
    /// The trigger carried by this update; `None` when there is no chat to answer.
    pub fn event(&self) -> Option<TriggerEvent> {
        let msg = self.message.as_ref().or(self.channel_post.as_ref())?;
        let chat_id = msg.chat.as_ref()?.id;
        Some(TriggerEvent {
            chat_id,
            text: msg.text.clone(),
        })
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Where notifications go. Sending never fails the caller.
pub trait Notifier: Send + Sync {
    fn send(&self, chat_id: i64, text: &str);
}

/// Telegram Bot API client.
pub struct TelegramClient {
    http: Client,
    api: String,
}

impl TelegramClient {
    pub fn new(http: Client, base: &str, token: &str) -> Self {
        Self {
            http,
            api: format!("{}/bot{}", base.trim_end_matches('/'), token),
        }
    }

    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        self.http
            .post(format!("{}/sendMessage", self.api))
            .timeout(config::API_TIMEOUT)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    pub fn delete_webhook(&self, drop_pending: bool) -> Result<(), TelegramError> {
        self.http
            .post(format!("{}/deleteWebhook", self.api))
            .timeout(Duration::from_secs(20))
            .json(&json!({ "drop_pending_updates": drop_pending }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        let mut query = vec![("timeout", timeout_secs.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let resp: ApiResponse<Vec<Update>> = self
            .http
            .get(format!("{}/getUpdates", self.api))
            .query(&query)
            .timeout(Duration::from_secs(timeout_secs + 10))
            .send()?
            .error_for_status()?
            .json()?;

        if !resp.ok {
            return Err(TelegramError::Api(resp.description.unwrap_or_default()));
        }
        Ok(resp.result.unwrap_or_default())
    }
}

impl Notifier for TelegramClient {
    fn send(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.send_message(chat_id, text) {
            error!("failed to send telegram message to {}: {}", chat_id, e);
        }
    }
}
