// src/diagnostics.rs
//! Bounded log ring buffer + run history, shared between the scheduler loop
//! and request handlers under one lock. Oldest entries are evicted first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::run::{DigestRun, RunId, RunSummary};

/// Hard ceiling regardless of configuration.
const MAX_CAP: usize = 10_000;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogLine {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct Inner {
    logs: VecDeque<LogLine>,
    runs: VecDeque<DigestRun>,
}

#[derive(Debug)]
pub struct Diagnostics {
    inner: Mutex<Inner>,
    log_cap: usize,
    run_cap: usize,
}

impl Diagnostics {
    pub fn new(log_cap: usize, run_cap: usize) -> Self {
        let log_cap = log_cap.clamp(1, MAX_CAP);
        let run_cap = run_cap.clamp(1, MAX_CAP);
        Self {
            inner: Mutex::new(Inner {
                logs: VecDeque::with_capacity(log_cap),
                runs: VecDeque::with_capacity(run_cap),
            }),
            log_cap,
            run_cap,
        }
    }

    // Never log while holding this: the tracing layer takes the same lock.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push_log(&self, line: LogLine) {
        let mut g = self.lock();
        if g.logs.len() >= self.log_cap {
            g.logs.pop_front();
        }
        g.logs.push_back(line);
    }

    /// Last `n` lines, oldest first.
    pub fn last_logs(&self, n: usize) -> Vec<LogLine> {
        let g = self.lock();
        let start = g.logs.len().saturating_sub(n);
        g.logs.iter().skip(start).cloned().collect()
    }

    /// Insert or replace by run id. A new run evicts the oldest when full.
    pub fn upsert_run(&self, run: &DigestRun) {
        let mut g = self.lock();
        if let Some(slot) = g.runs.iter_mut().find(|r| r.run_id == run.run_id) {
            *slot = run.clone();
            return;
        }
        if g.runs.len() >= self.run_cap {
            g.runs.pop_front();
        }
        g.runs.push_back(run.clone());
    }

    /// Up to `limit` most recent run summaries, newest last.
    pub fn runs(&self, limit: usize) -> Vec<RunSummary> {
        let g = self.lock();
        let start = g.runs.len().saturating_sub(limit);
        g.runs.iter().skip(start).map(DigestRun::summary).collect()
    }

    pub fn run(&self, run_id: RunId) -> Option<DigestRun> {
        self.lock().runs.iter().find(|r| r.run_id == run_id).cloned()
    }

    /// Most recent run that reached a terminal status.
    pub fn last_finished(&self) -> Option<RunSummary> {
        self.lock()
            .runs
            .iter()
            .rev()
            .find(|r| r.status.is_terminal())
            .map(DigestRun::summary)
    }

    pub fn capacities(&self) -> (usize, usize) {
        (self.log_cap, self.run_cap)
    }
}

/// Mirrors every tracing event into the ring buffer.
pub struct DiagnosticsLayer {
    sink: Arc<Diagnostics>,
}

impl DiagnosticsLayer {
    pub fn new(sink: Arc<Diagnostics>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for DiagnosticsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut v = LineVisitor::default();
        event.record(&mut v);
        let meta = event.metadata();
        self.sink.push_log(LogLine {
            ts: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: format!("{}{}", v.message, v.fields),
        });
    }
}
