//! Pluggable alert channel drivers.
//!
//! Each driver delivers one pre-formatted message. Drivers never retry on
//! their own; retry policy belongs to the dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::info;

/// Delivery failure from a channel driver.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel misconfigured: {0}")]
    Misconfigured(&'static str),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A single outbound alert channel.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &str) -> Result<(), ChannelError>;
}

/// Structured-log channel; always succeeds.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        info!(component = "alerts", channel = "log", alert = message, "alert");
        Ok(())
    }
}

fn http_client() -> Result<reqwest::Client, ChannelError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ChannelError::Delivery(e.to_string()))
}

/// Slack incoming-webhook channel.
pub struct SlackChannel {
    webhook_url: String,
}

impl SlackChannel {
    pub fn new(webhook_url: String) -> Self {
        Self { webhook_url }
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let response = http_client()?
            .post(&self.webhook_url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Delivery(format!(
                "slack webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Telegram bot channel.
pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self { bot_token, chat_id }
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = http_client()?
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": message }))
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Delivery(format!(
                "telegram API returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Email via a transactional provider's HTTP API.
pub struct EmailChannel {
    provider_url: String,
    api_key: String,
    from: String,
    to: String,
}

impl EmailChannel {
    pub fn new(provider_url: String, api_key: String, from: String, to: String) -> Self {
        Self {
            provider_url,
            api_key,
            from,
            to,
        }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let subject = message.lines().next().unwrap_or("polypulse alert");
        let response = http_client()?
            .post(&self.provider_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": self.to,
                "subject": subject,
                "text": message,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Delivery(format!(
                "email provider returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
