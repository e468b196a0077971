// src/ingest/rate_limit.rs
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Per-origin pacing: consecutive requests to the same scheme+host+port are
/// spaced by a random delay in `[min_delay, max_delay]`. Waiters on one origin
/// are served FIFO (tokio's mutex is fair); distinct origins never wait on
/// each other.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    origins: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until `origin` may be hit again, then stamp it.
    pub async fn acquire(&self, origin: &str) {
        let slot = {
            let mut map = self.origins.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(origin.to_string()).or_default().clone()
        };

        let mut last = slot.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.pick_delay();
            if ready_at > Instant::now() {
                tracing::debug!(target: "fetch", origin, "pacing request");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn pick_delay(&self) -> Duration {
        let lo = self.min_delay.as_millis() as u64;
        let hi = self.max_delay.as_millis() as u64;
        if hi <= lo {
            return self.min_delay;
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Rate-limit key for a URL: scheme + host (+ explicit port).
pub fn origin_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => u.origin().ascii_serialization(),
        Err(_) => url.to_string(),
    }
}
