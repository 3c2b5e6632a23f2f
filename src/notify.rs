// plantvault/src/notify.rs
//! Out-of-band alerts for failures nobody is watching interactively.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub subject: String,
    pub detail: String,
    pub schedule_id: Option<i64>,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn scheduled_failure(schedule_id: i64, detail: &str) -> Self {
        Self {
            subject: format!("Scheduled backup #{} failed", schedule_id),
            detail: detail.to_string(),
            schedule_id: Some(schedule_id),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        error!(
            subject = %alert.subject,
            schedule_id = ?alert.schedule_id,
            detail = %alert.detail,
            "alert"
        );
        Ok(())
    }
}

/// POSTs the alert as JSON.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| AppError::Alert(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Alert(format!(
                "webhook returned {}: {}",
                status,
                crate::utils::truncate_diagnostic(&body)
            )));
        }
        Ok(())
    }
}

pub fn sink_for(webhook_url: Option<&str>) -> Arc<dyn AlertSink> {
    match webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.to_string())),
        None => Arc::new(LogAlertSink),
    }
}

/// Sends an alert on its own task. Delivery problems are logged and dropped.
pub fn dispatch_detached(sink: Arc<dyn AlertSink>, alert: Alert, limit: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(limit, sink.send(&alert)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(subject = %alert.subject, error = %e, "alert delivery failed"),
            Err(_) => warn!(subject = %alert.subject, timeout_secs = limit.as_secs(), "alert delivery timed out"),
        }
    })
}
