//! Notification delivery.
//!
//! | Provider | Behavior |
//! |----------|----------|
//! | `log` | emits one structured `info` event per notification |
//! | `webhook` | POSTs the notification as JSON to `notify.webhook_url` |
//!
//! The webhook body is the serialized [`Notification`]; an email relay
//! (or anything else) turns it into a message.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use sitewatch_core::models::Notification;
use sitewatch_core::traits::Notifier;
use sitewatch_core::WatchError;

use crate::config::NotifyConfig;

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> sitewatch_core::Result<()> {
        tracing::info!(
            recipient = %n.recipient,
            kind = ?n.kind,
            subject = %n.subject,
            url = %n.url,
            summary = n.summary.as_deref().unwrap_or(""),
            "notification"
        );
        Ok(())
    }
}

pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: &Notification) -> sitewatch_core::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(n)
            .send()
            .await
            .map_err(|e| WatchError::fetch(format!("webhook delivery failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::fetch(format!(
                "webhook returned HTTP {} for {}",
                status, n.recipient
            )));
        }
        Ok(())
    }
}

pub fn create_notifier(config: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    match config.provider.as_str() {
        "log" => Ok(Arc::new(LogNotifier)),
        "webhook" => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("notify.webhook_url required for webhook provider"))?;
            Ok(Arc::new(WebhookNotifier::new(url, config.timeout_secs)?))
        }
        other => bail!("Unknown notify provider: {}", other),
    }
}
