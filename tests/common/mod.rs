// tests/common/mod.rs
//
// Shared builders for the integration tests: sources pointing at a local
// wiremock server, a fast fetch policy and a transport that records what
// it was asked to send.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use news_digest::config::ScheduleSpec;
use news_digest::diagnostics::Diagnostics;
use news_digest::errors::TransportError;
use news_digest::ingest::config::SourceRegistry;
use news_digest::ingest::fetcher::{FetchPolicy, Fetcher};
use news_digest::ingest::types::{Source, SourceKind};
use news_digest::notify::{Mailer, OutgoingMessage, Transport, TransportKind};
use news_digest::pipeline::Pipeline;
use news_digest::scheduler::Scheduler;

pub fn source(name: &str, url: String, kind: SourceKind, keywords: &[&str]) -> Source {
    Source {
        name: name.to_string(),
        url,
        kind,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        max_age_days: 7,
        max_articles: 10,
        enabled: true,
    }
}

/// One retry, no pacing and a short timeout so failure paths stay quick.
pub fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        max_retries: 1,
        retry_delay: Duration::from_millis(20),
        timeout: Duration::from_millis(300),
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        concurrency: 4,
        ..FetchPolicy::default()
    }
}

/// Minimal RSS 2.0 document; `items` are (title, link, published_at).
pub fn rss(items: &[(&str, &str, DateTime<Utc>)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>t</title>"#,
    );
    for (title, link, at) in items {
        body.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link><pubDate>{}</pubDate><description>About {title}.</description></item>",
            at.to_rfc2822()
        ));
    }
    body.push_str("</channel></rss>");
    body
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub recipient: String,
    pub formatted: String,
}

/// Records every send. Scripted failures are consumed first, then every
/// send succeeds.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    script: Mutex<VecDeque<TransportError>>,
}

impl RecordingTransport {
    pub fn failing_with(errors: Vec<TransportError>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(errors.into()),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Smtp
    }

    async fn send(&self, msg: &OutgoingMessage) -> Result<(), TransportError> {
        if let Some(e) = self.script.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.sent.lock().unwrap().push(Sent {
            recipient: msg.recipient.clone(),
            formatted: String::from_utf8_lossy(&msg.message.formatted()).into_owned(),
        });
        Ok(())
    }
}

pub fn pipeline_with(
    sources: Vec<Source>,
    transport: Arc<dyn Transport>,
    recipients: &[&str],
) -> (Arc<Pipeline>, Arc<Diagnostics>) {
    let diagnostics = Arc::new(Diagnostics::new(200, 20));
    let registry = SourceRegistry::new(sources).expect("valid sources");
    let fetcher = Fetcher::new(fast_policy()).expect("http client");
    let mailer = Mailer::new(
        transport,
        "digest@example.com".into(),
        recipients.iter().map(|r| r.to_string()).collect(),
    )
    .with_retry_delay(Duration::ZERO);
    let pipeline = Pipeline::new(
        Arc::new(registry),
        fetcher,
        mailer,
        "Test Digest",
        diagnostics.clone(),
    );
    (Arc::new(pipeline), diagnostics)
}

pub fn daily_schedule() -> ScheduleSpec {
    ScheduleSpec::parse("07:00", "UTC", None).expect("valid schedule")
}

pub fn scheduler_for(pipeline: Arc<Pipeline>, diagnostics: Arc<Diagnostics>) -> Scheduler {
    Scheduler::new(
        pipeline,
        daily_schedule(),
        Duration::from_secs(10),
        diagnostics,
    )
}
