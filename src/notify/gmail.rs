// src/notify/gmail.rs
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{OutgoingMessage, Transport, TransportKind};
use crate::config::OAuthConfig;
use crate::errors::{ConfigError, TransportError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Refresh this long before the server-side expiry.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    /// `None` for a token handed over in configuration (expiry unknown).
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .map_or(true, |t| Instant::now() + EXPIRY_SLACK < t)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize, Default)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Gmail-style HTTPS API: OAuth refresh-token grant, then
/// `POST /gmail/v1/users/me/messages/send` with the base64url RFC 822 message.
pub struct HttpsApiTransport {
    client: Client,
    cfg: OAuthConfig,
    token: Mutex<Option<CachedToken>>,
}

impl HttpsApiTransport {
    pub fn new(cfg: OAuthConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Parse(format!("oauth http client: {e}")))?;
        let token = cfg.access_token.clone().map(|access_token| CachedToken {
            access_token,
            expires_at: None,
        });
        Ok(Self {
            client,
            cfg,
            token: Mutex::new(token),
        })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/gmail/v1/users/me/messages/send",
            self.cfg.api_base.trim_end_matches('/')
        )
    }

    /// Returns a usable access token and whether it was just refreshed.
    async fn access_token(&self) -> Result<(String, bool), TransportError> {
        let mut slot = self.token.lock().await;
        if let Some(t) = slot.as_ref().filter(|t| t.is_fresh()) {
            return Ok((t.access_token.clone(), false));
        }
        let fresh = self.refresh().await?;
        let token = fresh.access_token.clone();
        *slot = Some(fresh);
        Ok((token, true))
    }

    async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn refresh(&self) -> Result<CachedToken, TransportError> {
        let rsp = self
            .client
            .post(&self.cfg.token_uri)
            .form(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("refresh_token", self.cfg.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| TransportError::NetworkError(format!("token endpoint: {e}")))?;

        let status = rsp.status();
        if status.is_success() {
            let body: TokenResponse = rsp
                .json()
                .await
                .map_err(|e| TransportError::NetworkError(format!("token response: {e}")))?;
            tracing::debug!(target: "transport", expires_in = ?body.expires_in, "access token refreshed");
            return Ok(CachedToken {
                access_token: body.access_token,
                expires_at: body
                    .expires_in
                    .map(|s| Instant::now() + Duration::from_secs(s)),
            });
        }

        let body: OAuthErrorBody = rsp.json().await.unwrap_or_default();
        let detail = format!(
            "token endpoint {}: {} {}",
            status.as_u16(),
            body.error.as_deref().unwrap_or("-"),
            body.error_description.as_deref().unwrap_or("")
        );
        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TransportError::AuthError(detail.trim_end().to_string())
            }
            StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited(detail),
            _ => TransportError::NetworkError(detail),
        })
    }

    async fn post_raw(&self, token: &str, raw: &str) -> Result<StatusCode, TransportError> {
        self.client
            .post(self.send_url())
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map(|r| r.status())
            .map_err(|e| TransportError::NetworkError(e.to_string()))
    }
}

fn classify_api_status(status: StatusCode) -> Result<(), TransportError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::AuthError(format!(
            "send rejected: {}",
            status.as_u16()
        ))),
        StatusCode::TOO_MANY_REQUESTS => Err(TransportError::RateLimited("send: 429".into())),
        s => Err(TransportError::NetworkError(format!("send: HTTP {}", s.as_u16()))),
    }
}

#[async_trait]
impl Transport for HttpsApiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::HttpsApi
    }

    async fn send(&self, msg: &OutgoingMessage) -> Result<(), TransportError> {
        let raw = URL_SAFE.encode(msg.message.formatted());

        let (token, refreshed) = self.access_token().await?;
        let status = self.post_raw(&token, &raw).await?;
        if status == StatusCode::UNAUTHORIZED && !refreshed {
            // Stored token went stale; one refresh, one resend.
            self.invalidate().await;
            let (token, _) = self.access_token().await?;
            return classify_api_status(self.post_raw(&token, &raw).await?);
        }
        classify_api_status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_mapping() {
        assert!(classify_api_status(StatusCode::OK).is_ok());
        assert!(matches!(
            classify_api_status(StatusCode::FORBIDDEN),
            Err(TransportError::AuthError(_))
        ));
        assert!(matches!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            Err(TransportError::RateLimited(_))
        ));
        assert!(matches!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            Err(TransportError::NetworkError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn config_token_has_unknown_expiry_and_stays_cached() {
        let t = HttpsApiTransport::new(OAuthConfig {
            client_id: "cid".into(),
            client_secret: "sec".into(),
            refresh_token: "rt".into(),
            access_token: Some("stored".into()),
            token_uri: "http://127.0.0.1:9/token".into(),
            api_base: "http://127.0.0.1:9".into(),
        })
        .unwrap();
        let (tok, refreshed) = t.access_token().await.unwrap();
        assert_eq!(tok, "stored");
        assert!(!refreshed);
        assert_eq!(t.send_url(), "http://127.0.0.1:9/gmail/v1/users/me/messages/send");
    }
}
