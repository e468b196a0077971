// src/run.rs
//! One end-to-end digest run and its summary as reported to pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{Article, SourceOutcome};
use crate::notify::DeliveryAttempt;

pub type RunId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Fetching,
    Composing,
    Delivering,
    Completed,
    DeliveredWithErrors,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::DeliveredWithErrors | RunStatus::Failed
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Fetching => "fetching",
            RunStatus::Composing => "composing",
            RunStatus::Delivering => "delivering",
            RunStatus::Completed => "completed",
            RunStatus::DeliveredWithErrors => "delivered_with_errors",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRecord {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestRun {
    pub run_id: RunId,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub source_outcomes: Vec<SourceRecord>,
    pub articles: Vec<Article>,
    pub delivery_attempts: Vec<DeliveryAttempt>,
    /// Why the run failed, when it did so before or during delivery.
    pub error: Option<String>,
}

impl DigestRun {
    pub fn new(run_id: RunId, trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            trigger,
            started_at,
            finished_at: None,
            status: RunStatus::Pending,
            source_outcomes: Vec::new(),
            articles: Vec::new(),
            delivery_attempts: Vec::new(),
            error: None,
        }
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.source_outcomes
            .iter()
            .filter(|r| r.outcome.is_failure())
            .map(|r| r.source.as_str())
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        let failed = self.failed_sources();
        RunSummary {
            run_id: self.run_id,
            trigger: self.trigger,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            articles: self.articles.len(),
            sources_ok: self.source_outcomes.len() - failed.len(),
            sources_failed: failed.len(),
            failed_sources: failed.into_iter().map(String::from).collect(),
            source_outcomes: self.source_outcomes.clone(),
            delivery_attempts: self.delivery_attempts.clone(),
            error: self.error.clone(),
        }
    }
}

/// Compact view of a run for history listings and trigger responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub articles: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub failed_sources: Vec<String>,
    pub source_outcomes: Vec<SourceRecord>,
    pub delivery_attempts: Vec<DeliveryAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
