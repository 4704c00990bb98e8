//! Outbound alert delivery. A fan-out mux pushes each alert to every
//! configured target; delivery trouble is logged and swallowed so a dead
//! webhook can never stall a scan.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::alert::Alert;

/// Webhook target URL, e.g. a Slack or Teams incoming-webhook endpoint.
pub const ENV_WEBHOOK_URL: &str = "SENTINEL_WEBHOOK_URL";

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage {
    text: String,
}

impl ChatMessage {
    fn for_alert(alert: &Alert) -> Self {
        Self {
            text: format!(
                "[{}] {}",
                alert.priority.as_str().to_uppercase(),
                alert.message
            ),
        }
    }
}

/// Posts one chat message per alert to an incoming-webhook URL.
#[derive(Clone)]
pub struct ChatWebhookNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl ChatWebhookNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[async_trait]
impl AlertNotifier for ChatWebhookNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let payload = ChatMessage::for_alert(alert);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(e).context("webhook non-2xx");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(e).context("webhook post");
                }
            }
        }
    }

    fn name(&self) -> &str {
        "chat_webhook"
    }
}

/// Fan-out over zero or more targets. Empty is fine; alerts then only
/// land in the sink and the logs.
#[derive(Default)]
pub struct NotifierMux {
    targets: Vec<Box<dyn AlertNotifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the environment. Only a well-formed URL registers a
    /// target; anything else leaves the mux empty with a log line.
    pub fn from_env() -> Self {
        let mut mux = Self::new();
        match std::env::var(ENV_WEBHOOK_URL) {
            Ok(url) if url.starts_with("http") => {
                info!(target = "chat_webhook", "alert webhook configured");
                mux.push(Box::new(ChatWebhookNotifier::new(url)));
            }
            Ok(url) if !url.trim().is_empty() => {
                warn!(%url, "ignoring webhook URL without http prefix");
            }
            _ => {}
        }
        mux
    }

    pub fn push(&mut self, target: Box<dyn AlertNotifier>) {
        self.targets.push(target);
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Best effort: every target gets a try, failures are logged.
    pub async fn notify_all(&self, alert: &Alert) {
        for target in &self.targets {
            if let Err(err) = target.notify(alert).await {
                warn!(
                    target_name = target.name(),
                    alert_id = %alert.id,
                    error = %err,
                    "alert delivery failed"
                );
            }
        }
    }
}
