//! Telegram Bot API transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::Notifier;
use crate::config::TelegramConfig;
use crate::error::{NotifyError, NotifyResult};

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> NotifyResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn from_config(config: &TelegramConfig) -> NotifyResult<Self> {
        Self::new(
            &config.api_base,
            &config.bot_token,
            &config.chat_id,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> NotifyResult<()> {
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_base, self.bot_token))
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: message,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::DeliveryFailed {
                transport: "telegram".to_string(),
                reason: format!("HTTP {}: {}", status, response.text().await.unwrap_or_default()),
            })
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
