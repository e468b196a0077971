// src/ingest/fetcher.rs
use chrono::Utc;
use metrics::{counter, histogram};
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::FetchError;
use crate::ingest::rate_limit::{origin_of, RateLimiter};
use crate::ingest::types::{FailureKind, FetchOutcome, RawContent, Source};

/// Upper bound for a server-supplied `Retry-After`, so one source cannot
/// stall a run indefinitely.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Retries after the first attempt; a source is tried `max_retries + 1` times.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            concurrency: 4,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct Fetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(policy.user_agent.clone()).build()?;
        let limiter = Arc::new(RateLimiter::new(policy.min_delay, policy.max_delay));
        Ok(Self {
            client,
            limiter,
            policy,
        })
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch one source with pacing and retries. Never fails the caller:
    /// exhausting the retries yields `FetchOutcome::Failure`.
    pub async fn fetch(&self, source: &Source) -> FetchOutcome {
        let origin = origin_of(&source.url);
        let attempts = self.policy.max_retries.saturating_add(1);
        let mut last_err = FetchError::Network("no attempt made".into());

        for attempt in 1..=attempts {
            self.limiter.acquire(&origin).await;
            counter!("digest_fetch_attempts_total").increment(1);

            let t0 = std::time::Instant::now();
            let res = self.attempt(&source.url).await;
            histogram!("digest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match res {
                Ok(raw) => {
                    tracing::info!(
                        target: "fetch",
                        source = %source.name,
                        attempt,
                        bytes = raw.body.len(),
                        "fetched"
                    );
                    return FetchOutcome::Success(raw);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "fetch",
                        source = %source.name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "fetch attempt failed"
                    );
                    if attempt < attempts {
                        let delay = match &e {
                            FetchError::RateLimited {
                                retry_after: Some(d),
                            } => *d,
                            _ => self.policy.retry_delay,
                        };
                        tokio::time::sleep(delay).await;
                    }
                    last_err = e;
                }
            }
        }

        let kind = FailureKind::from(&last_err);
        counter!("digest_source_failures_total", "kind" => kind.label()).increment(1);
        FetchOutcome::failure(kind, last_err.to_string())
    }

    async fn attempt(&self, url: &str) -> Result<RawContent, FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.policy.timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::HttpError(status.as_u16()));
        }

        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(map_reqwest_err)?;

        Ok(RawContent {
            body,
            url: final_url,
            content_type,
            fetched_at: Utc::now(),
        })
    }
}

fn map_reqwest_err(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::HttpError(status.as_u16())
    } else {
        FetchError::Network(e.to_string())
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date.
pub fn parse_retry_after(v: &str) -> Option<Duration> {
    let v = v.trim();
    let d = if let Ok(secs) = v.parse::<u64>() {
        Duration::from_secs(secs)
    } else {
        let at = chrono::DateTime::parse_from_rfc2822(v).ok()?;
        (at.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    };
    Some(d.min(MAX_RETRY_AFTER))
}
