// src/notify/mod.rs
//! Delivery transports. One `Transport` is selected at startup; every
//! recipient gets one send plus exactly one in-run retry on failure.

pub mod email;
pub mod gmail;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart};
use lettre::Message;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::digest::RenderedDigest;
use crate::errors::{ComposeError, ConfigError, ConfigResult, TransportError};

pub use email::SmtpTransport;
pub use gmail::HttpsApiTransport;

/// Attempts per recipient: the first send plus one retry.
pub const MAX_SEND_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Smtp,
    HttpsApi,
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Smtp => "smtp",
            TransportKind::HttpsApi => "https_api",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    Sent,
    AuthError,
    NetworkError,
    RateLimited,
    InvalidAddress,
}

impl DeliveryResult {
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryResult::Sent => "sent",
            DeliveryResult::AuthError => "auth_error",
            DeliveryResult::NetworkError => "network_error",
            DeliveryResult::RateLimited => "rate_limited",
            DeliveryResult::InvalidAddress => "invalid_address",
        }
    }
}

impl From<&TransportError> for DeliveryResult {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::AuthError(_) => DeliveryResult::AuthError,
            TransportError::NetworkError(_) => DeliveryResult::NetworkError,
            TransportError::RateLimited(_) => DeliveryResult::RateLimited,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub transport_kind: TransportKind,
    pub recipient: String,
    pub attempt_number: u32,
    pub result: DeliveryResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A fully built RFC 822 message for one recipient.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipient: String,
    pub message: Message,
}

impl OutgoingMessage {
    /// multipart/alternative (plain text + HTML).
    pub fn build(from: &str, to: &str, digest: &RenderedDigest) -> Result<Self, ComposeError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| ComposeError::Address(format!("{from}: {e}")))?;
        let to_box: Mailbox = to
            .parse()
            .map_err(|e| ComposeError::Address(format!("{to}: {e}")))?;
        let message = Message::builder()
            .from(from)
            .to(to_box)
            .subject(digest.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                digest.text.clone(),
                digest.html.clone(),
            ))
            .map_err(|e| ComposeError::Message(e.to_string()))?;
        Ok(Self {
            recipient: to.to_string(),
            message,
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send(&self, msg: &OutgoingMessage) -> Result<(), TransportError>;
}

/// OAuth API when configured (works where SMTP ports are blocked), else SMTP.
pub fn select_transport(cfg: &DeliveryConfig) -> ConfigResult<Arc<dyn Transport>> {
    if let Some(oauth) = &cfg.oauth {
        tracing::info!(target: "transport", transport = "https_api", "transport selected");
        return Ok(Arc::new(HttpsApiTransport::new(oauth.clone())?));
    }
    if let Some(smtp) = &cfg.smtp {
        tracing::info!(target: "transport", transport = "smtp", host = %smtp.host, port = smtp.port, "transport selected");
        return Ok(Arc::new(SmtpTransport::new(smtp)?));
    }
    Err(ConfigError::MissingCredential(
        "no SMTP or OAuth credentials configured".into(),
    ))
}

/// Per-recipient outcome of one delivery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub attempts: Vec<DeliveryAttempt>,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryReport {
    pub fn all_failed(&self) -> bool {
        self.delivered.is_empty()
    }

    /// Last attempt of a recipient that never got the message.
    pub fn last_error(&self) -> Option<&DeliveryAttempt> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.result != DeliveryResult::Sent && self.failed.contains(&a.recipient))
    }
}

/// Sender, recipients and the selected transport.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn Transport>,
    sender: String,
    recipients: Vec<String>,
    retry_delay: Duration,
}

impl Mailer {
    pub fn new(transport: Arc<dyn Transport>, sender: String, recipients: Vec<String>) -> Self {
        Self {
            transport,
            sender,
            recipients,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Sends sequentially, one recipient at a time. A bad sender address
    /// fails the whole pass; a bad recipient address fails only that
    /// recipient and is never handed to the transport.
    pub async fn deliver(&self, digest: &RenderedDigest) -> Result<DeliveryReport, ComposeError> {
        self.sender
            .parse::<Mailbox>()
            .map_err(|e| ComposeError::Address(format!("{}: {e}", self.sender)))?;

        let mut report = DeliveryReport::default();
        for to in &self.recipients {
            let msg = match OutgoingMessage::build(&self.sender, to, digest) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(target: "transport", recipient = %to, error = %e, "recipient skipped");
                    report.failed.push(to.clone());
                    report.attempts.push(DeliveryAttempt {
                        transport_kind: self.transport.kind(),
                        recipient: to.clone(),
                        attempt_number: 1,
                        result: DeliveryResult::InvalidAddress,
                        detail: Some(e.to_string()),
                        timestamp: Utc::now(),
                    });
                    continue;
                }
            };
            let attempts = self.send_with_retry(&msg).await;
            let ok = attempts.last().is_some_and(|a| a.result == DeliveryResult::Sent);
            if ok {
                report.delivered.push(msg.recipient.clone());
            } else {
                report.failed.push(msg.recipient.clone());
            }
            report.attempts.extend(attempts);
        }
        Ok(report)
    }

    async fn send_with_retry(&self, msg: &OutgoingMessage) -> Vec<DeliveryAttempt> {
        let kind = self.transport.kind();
        let mut attempts = Vec::with_capacity(MAX_SEND_ATTEMPTS as usize);
        for attempt_number in 1..=MAX_SEND_ATTEMPTS {
            let res = self.transport.send(msg).await;
            let (result, detail) = match &res {
                Ok(()) => (DeliveryResult::Sent, None),
                Err(e) => (DeliveryResult::from(e), Some(e.to_string())),
            };
            counter!(
                "digest_delivery_attempts_total",
                "transport" => kind.label(),
                "result" => result.label()
            )
            .increment(1);
            attempts.push(DeliveryAttempt {
                transport_kind: kind,
                recipient: msg.recipient.clone(),
                attempt_number,
                result,
                detail,
                timestamp: Utc::now(),
            });

            match res {
                Ok(()) => {
                    tracing::info!(target: "transport", transport = kind.label(), recipient = %msg.recipient, attempt = attempt_number, "delivered");
                    break;
                }
                Err(e) => {
                    tracing::warn!(target: "transport", transport = kind.label(), recipient = %msg.recipient, attempt = attempt_number, error = %e, "delivery failed");
                    if attempt_number < MAX_SEND_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        attempts
    }
}
