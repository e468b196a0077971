// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod digest;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod run;
pub mod scheduler;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::errors::{
    ComposeError, ConfigError, ExtractError, FetchError, TransportError, TriggerError,
};
pub use crate::pipeline::Pipeline;
pub use crate::run::{DigestRun, RunStatus, Trigger};
pub use crate::scheduler::{Scheduler, SchedulerState};
