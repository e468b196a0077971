// src/errors.rs
//! Error taxonomy for the pipeline. Per-source errors (fetch/extract) never
//! escalate past their source; transport errors are recorded per recipient;
//! config errors keep the scheduler disarmed.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(u16),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("rate limited: {0}")]
    RateLimited(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("rendering digest: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("duplicate article url in digest: {0}")]
    Duplicate(String),

    #[error("invalid address: {0}")]
    Address(String),

    #[error("building message: {0}")]
    Message(String),
}

/// Outcome of a management "trigger run" request that did not start a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("a run is already in flight")]
    Busy,

    #[error("scheduler is not armed: {0}")]
    NotArmed(String),

    #[error("run task failed: {0}")]
    Failed(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
