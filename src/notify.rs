//! Alert delivery.
//!
//! Alerting is best-effort: [`Notifier::notify`] never fails, so a broken or
//! missing channel cannot take the monitoring loop down with it.

use crate::config::MonitorConfig;

use async_trait::async_trait;
use serde::Serialize;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification channel is not configured")]
    NotConfigured,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bot API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Sink for alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API notifier.
///
/// The HTTP client is built on first use and shared by every caller after
/// that; concurrent first callers wait on the same initialization.
pub struct TelegramNotifier {
    api_url: String,
    token: Option<String>,
    chat_id: Option<String>,
    transport: OnceCell<reqwest::Client>,
    #[cfg(test)]
    constructed: AtomicUsize,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            chat_id,
            transport: OnceCell::new(),
            #[cfg(test)]
            constructed: AtomicUsize::new(0),
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self::new(&cfg.telegram_api_url, cfg.bot_token.clone(), cfg.chat_id.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    async fn transport(&self) -> Result<&reqwest::Client, NotifyError> {
        self.transport
            .get_or_try_init(|| async {
                #[cfg(test)]
                self.constructed.fetch_add(1, Ordering::SeqCst);
                reqwest::Client::builder().timeout(SEND_TIMEOUT).build()
            })
            .await
            .map_err(NotifyError::from)
    }

    /// Send a message, reporting every failure to the caller.
    pub async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let (Some(token), Some(chat_id)) = (&self.token, &self.chat_id) else {
            return Err(NotifyError::NotConfigured);
        };

        let client = self.transport().await?;
        let response = client
            .post(format!("{}/bot{}/sendMessage", self.api_url, token))
            .json(&SendMessage {
                chat_id,
                text: message,
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        if !self.is_configured() {
            tracing::info!("No notification channel configured, alert not sent: {}", message);
            return;
        }

        match self.send(message).await {
            Ok(()) => tracing::debug!("Alert delivered: {}", message),
            Err(e) => tracing::error!("Failed to deliver alert: {}", e),
        }
    }
}
