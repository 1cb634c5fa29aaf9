use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,
    #[error("no recipients configured")]
    NoRecipients,
    #[error("rejected with status {0}")]
    Rejected(u16),
    #[error("http error: {0}")]
    Http(String),
}

#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send_alert(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), TransportError>;

    async fn send_report(
        &self,
        subject: &str,
        attachments: &[Attachment],
        recipients: &[String],
    ) -> Result<(), TransportError>;
}

pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    async fn send_alert(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), TransportError> {
        if recipients.is_empty() {
            return Err(TransportError::NoRecipients);
        }
        self.post(json!({
            "kind": "alert",
            "subject": subject,
            "body": body,
            "recipients": recipients,
        }))
        .await
    }

    async fn send_report(
        &self,
        subject: &str,
        attachments: &[Attachment],
        recipients: &[String],
    ) -> Result<(), TransportError> {
        if recipients.is_empty() {
            return Err(TransportError::NoRecipients);
        }
        let files: Vec<_> = attachments
            .iter()
            .map(|a| {
                json!({
                    "filename": a.filename,
                    "contentType": a.content_type,
                    "contentBytes": STANDARD.encode(&a.bytes),
                })
            })
            .collect();
        self.post(json!({
            "kind": "report",
            "subject": subject,
            "attachments": files,
            "recipients": recipients,
        }))
        .await
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    async fn send_alert(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), TransportError> {
        info!(%subject, recipients = recipients.len(), %body, "alert (log transport)");
        Ok(())
    }

    async fn send_report(
        &self,
        subject: &str,
        attachments: &[Attachment],
        recipients: &[String],
    ) -> Result<(), TransportError> {
        let names: Vec<&str> = attachments.iter().map(|a| a.filename.as_str()).collect();
        info!(%subject, recipients = recipients.len(), attachments = ?names, "report (log transport)");
        Ok(())
    }
}

// Failures are logged and dropped; the next cycle is the retry.
pub fn dispatch_alert(
    transport: Arc<dyn AlertTransport>,
    subject: String,
    body: String,
    recipients: Vec<String>,
    limit: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sent = tokio::time::timeout(limit, transport.send_alert(&subject, &body, &recipients)).await;
        log_outcome("alert", &subject, sent);
    })
}

pub fn dispatch_report(
    transport: Arc<dyn AlertTransport>,
    subject: String,
    attachments: Vec<Attachment>,
    recipients: Vec<String>,
    limit: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sent = tokio::time::timeout(
            limit,
            transport.send_report(&subject, &attachments, &recipients),
        )
        .await;
        log_outcome("report", &subject, sent);
    })
}

fn log_outcome(
    kind: &str,
    subject: &str,
    sent: Result<Result<(), TransportError>, tokio::time::error::Elapsed>,
) {
    match sent {
        Ok(Ok(())) => info!(kind, subject, "notification sent"),
        Ok(Err(err)) => warn!(kind, subject, error=%err, "notification failed"),
        Err(_) => warn!(kind, subject, error=%TransportError::Timeout, "notification failed"),
    }
}
