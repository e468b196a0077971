// src/pipeline.rs
//! Drives one DigestRun through Fetching -> Composing -> Delivering -> terminal,
//! recording every transition in the run history.

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use metrics::{counter, gauge};
use std::sync::Arc;

use crate::diagnostics::Diagnostics;
use crate::digest;
use crate::errors::ComposeError;
use crate::ingest::config::SourceRegistry;
use crate::ingest::fetcher::Fetcher;
use crate::ingest::types::Article;
use crate::ingest::{self, ensure_metrics_described};
use crate::notify::{DeliveryReport, DeliveryResult, Mailer};
use crate::run::{DigestRun, RunId, RunStatus, SourceRecord, Trigger};

pub struct Pipeline {
    registry: Arc<SourceRegistry>,
    fetcher: Fetcher,
    mailer: Mailer,
    title: String,
    tz: Tz,
    diagnostics: Arc<Diagnostics>,
}

/// Result of the transport-only test send.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TestSendReport {
    pub transport: &'static str,
    pub result: DeliveryResult,
    #[serde(flatten)]
    pub delivery: DeliveryReport,
}

impl Pipeline {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Fetcher,
        mailer: Mailer,
        title: impl Into<String>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            mailer,
            title: title.into(),
            tz: Tz::UTC,
            diagnostics,
        }
    }

    /// Zone for the date in the digest subject; the scheduler's zone in
    /// production.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    fn transition(&self, run: &mut DigestRun, status: RunStatus) {
        run.status = status;
        self.diagnostics.upsert_run(run);
        tracing::debug!(target: "scheduler", run_id = run.run_id, status = status.label(), "run transition");
    }

    fn finish(&self, mut run: DigestRun, status: RunStatus, error: Option<String>) -> DigestRun {
        run.finished_at = Some(Utc::now());
        run.error = error;
        self.transition(&mut run, status);

        counter!("digest_runs_total", "status" => status.label()).increment(1);
        gauge!("digest_last_run_ts").set(Utc::now().timestamp() as f64);
        if status == RunStatus::Failed {
            tracing::error!(
                target: "scheduler",
                run_id = run.run_id,
                error = run.error.as_deref().unwrap_or("-"),
                "run failed"
            );
        } else {
            tracing::info!(
                target: "scheduler",
                run_id = run.run_id,
                status = status.label(),
                articles = run.articles.len(),
                failed_sources = ?run.failed_sources(),
                "run finished"
            );
        }
        run
    }

    /// Full pipeline. Source failures stay local to their source; the run
    /// fails only if composing fails or no recipient got the digest.
    pub async fn execute(&self, run_id: RunId, trigger: Trigger) -> DigestRun {
        ensure_metrics_described();
        let mut run = DigestRun::new(run_id, trigger, Utc::now());
        tracing::info!(target: "scheduler", run_id, trigger = ?trigger, sources = self.registry.len(), "run started");
        self.diagnostics.upsert_run(&run);

        self.transition(&mut run, RunStatus::Fetching);
        let report = ingest::run_once(&self.fetcher, &self.registry, run.started_at).await;
        for name in report.failed_sources() {
            tracing::warn!(target: "fetch", run_id, source = name, "source failed for this run");
        }
        run.source_outcomes = report
            .outcomes
            .iter()
            .map(|(source, outcome)| SourceRecord {
                source: source.clone(),
                outcome: outcome.clone(),
            })
            .collect();
        run.articles = report.articles;

        self.transition(&mut run, RunStatus::Composing);
        let rendered = match digest::compose(&self.title, &run.articles, &report.outcomes, Utc::now())
            .and_then(|d| d.in_timezone(self.tz).render())
        {
            Ok(r) => r,
            Err(e) => return self.finish(run, RunStatus::Failed, Some(e.to_string())),
        };

        self.transition(&mut run, RunStatus::Delivering);
        let delivery = match self.mailer.deliver(&rendered).await {
            Ok(d) => d,
            Err(e) => return self.finish(run, RunStatus::Failed, Some(e.to_string())),
        };
        run.delivery_attempts = delivery.attempts.clone();

        let sources_failed = run.source_outcomes.iter().any(|r| r.outcome.is_failure());
        let (status, error) = if delivery.all_failed() {
            let why = delivery
                .last_error()
                .and_then(|a| a.detail.clone())
                .unwrap_or_else(|| "delivery failed for every recipient".into());
            (RunStatus::Failed, Some(why))
        } else if sources_failed || !delivery.failed.is_empty() {
            (RunStatus::DeliveredWithErrors, None)
        } else {
            (RunStatus::Completed, None)
        };
        self.finish(run, status, error)
    }

    /// Sends a one-article sample digest through the configured transport.
    /// Not recorded as a run.
    pub async fn send_test_message(&self) -> Result<TestSendReport, ComposeError> {
        let now = Utc::now();
        let sample = Article {
            source_name: "Test".into(),
            title: "Test message: delivery is configured".into(),
            canonical_url: "https://example.com/news-digest-test".into(),
            published_at: now - Duration::minutes(5),
            summary: "If you can read this, the digest transport works.".into(),
            image_url: None,
            fetched_at: now,
        };
        let rendered = digest::compose(&format!("{} (test)", self.title), &[sample], &[], now)?
            .in_timezone(self.tz)
            .render()?;
        let delivery = self.mailer.deliver(&rendered).await?;
        let result = delivery
            .last_error()
            .map(|a| a.result)
            .unwrap_or(DeliveryResult::Sent);
        tracing::info!(target: "transport", result = result.label(), delivered = delivery.delivered.len(), "test message sent");
        Ok(TestSendReport {
            transport: self.mailer.transport_kind().label(),
            result,
            delivery,
        })
    }
}
