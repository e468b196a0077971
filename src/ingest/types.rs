// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ExtractError, FetchError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Html,
    Feed,
}

/// One configured source. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Empty = match everything.
    pub keywords: Vec<String>,
    pub max_age_days: u32,
    pub max_articles: usize,
    pub enabled: bool,
}

impl Source {
    /// Case-insensitive keyword match against any of `fields`.
    pub fn matches_keywords(&self, fields: &[&str]) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let hay: Vec<String> = fields.iter().map(|f| f.to_lowercase()).collect();
        self.keywords.iter().any(|k| {
            let k = k.to_lowercase();
            hay.iter().any(|h| h.contains(&k))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub source_name: String,
    pub title: String,
    pub canonical_url: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
    pub image_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Failure classification recorded per source in a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "status")]
pub enum FailureKind {
    Timeout,
    HttpError(u16),
    RateLimited,
    ParseFailure,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::HttpError(_) => "http_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ParseFailure => "parse_failure",
        }
    }
}

impl From<&FetchError> for FailureKind {
    fn from(e: &FetchError) -> Self {
        match e {
            FetchError::Timeout => FailureKind::Timeout,
            FetchError::HttpError(s) => FailureKind::HttpError(*s),
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            // Connection-level failures surface as a status-less HTTP error.
            FetchError::Network(_) => FailureKind::HttpError(0),
        }
    }
}

impl From<&ExtractError> for FailureKind {
    fn from(_: &ExtractError) -> Self {
        FailureKind::ParseFailure
    }
}

/// Raw result of fetching one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(RawContent),
    Failure { kind: FailureKind, detail: String },
}

impl FetchOutcome {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        FetchOutcome::Failure {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub body: String,
    /// Final URL after redirects; used to resolve relative links.
    pub url: String,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// What a run records for each enabled source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Success { articles: usize },
    Failure { failure: FailureKind, detail: String },
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SourceOutcome::Failure { .. })
    }
}
