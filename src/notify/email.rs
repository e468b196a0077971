// src/notify/email.rs
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::AsyncSmtpTransport;
use lettre::{AsyncTransport, Tokio1Executor};
use std::time::Duration;

use super::{OutgoingMessage, Transport, TransportKind};
use crate::config::SmtpConfig;
use crate::errors::{ConfigError, TransportError};

const IMPLICIT_TLS_PORT: u16 = 465;
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

type Mailer = AsyncSmtpTransport<Tokio1Executor>;

/// Direct SMTP with credentials. Port 465 uses implicit TLS, anything else
/// STARTTLS; a network failure over STARTTLS is retried once on 465.
pub struct SmtpTransport {
    host: String,
    port: u16,
    primary: Mailer,
    fallback: Option<Mailer>,
}

fn build(cfg: &SmtpConfig, port: u16) -> Result<Mailer, ConfigError> {
    let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());
    let builder = if port == IMPLICIT_TLS_PORT {
        Mailer::relay(&cfg.host)
    } else {
        Mailer::starttls_relay(&cfg.host)
    }
    .map_err(|e| ConfigError::Parse(format!("SMTP_SERVER {}: {e}", cfg.host)))?;
    Ok(builder
        .port(port)
        .credentials(creds)
        .timeout(Some(SMTP_TIMEOUT))
        .build())
}

impl SmtpTransport {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, ConfigError> {
        let fallback = if cfg.port == IMPLICIT_TLS_PORT {
            None
        } else {
            Some(build(cfg, IMPLICIT_TLS_PORT)?)
        };
        Ok(Self {
            host: cfg.host.clone(),
            port: cfg.port,
            primary: build(cfg, cfg.port)?,
            fallback,
        })
    }
}

/// 530/534/535 are credential problems; other transient (4xx) replies are
/// throttling; everything else is treated as a network failure.
pub fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> TransportError {
    let code = err
        .status()
        .and_then(|c| c.to_string().parse::<u16>().ok());
    match code {
        Some(530 | 534 | 535) => TransportError::AuthError(err.to_string()),
        Some(c) if (400..500).contains(&c) => TransportError::RateLimited(err.to_string()),
        _ => TransportError::NetworkError(err.to_string()),
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Smtp
    }

    async fn send(&self, msg: &OutgoingMessage) -> Result<(), TransportError> {
        let err = match self.primary.send(msg.message.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) => classify_smtp_error(&e),
        };

        match (&err, &self.fallback) {
            (TransportError::NetworkError(_), Some(fallback)) => {
                tracing::warn!(
                    target: "transport",
                    host = %self.host,
                    port = self.port,
                    error = %err,
                    "STARTTLS failed, retrying over implicit TLS on 465"
                );
                fallback
                    .send(msg.message.clone())
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_smtp_error(&e))
            }
            _ => Err(err),
        }
    }
}
