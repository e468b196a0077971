// src/scheduler.rs
//! Single-flight scheduler: Idle -> Armed(next fire) -> Firing -> Armed.
//! Only the scheduler starts runs; a trigger that finds it Firing is
//! rejected as busy, never queued.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ScheduleSpec;
use crate::diagnostics::Diagnostics;
use crate::errors::TriggerError;
use crate::pipeline::Pipeline;
use crate::run::{DigestRun, RunId, RunStatus, Trigger};

pub const HEARTBEAT_EVERY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Armed { next_fire: DateTime<Utc> },
    Firing { run_id: RunId, trigger: Trigger },
    Disarmed { reason: String },
}

impl SchedulerState {
    pub fn label(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Armed { .. } => "armed",
            SchedulerState::Firing { .. } => "firing",
            SchedulerState::Disarmed { .. } => "disarmed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub scheduler: SchedulerState,
    pub schedule: Option<String>,
    pub next_fire: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub transport: Option<&'static str>,
}

/// What a manual trigger got back within its blocking bound.
#[derive(Debug, Clone)]
pub enum ManualOutcome {
    Finished(DigestRun),
    /// Bound elapsed; the run continues and shows up in run history.
    StillRunning { run_id: RunId },
}

struct Core {
    pipeline: Arc<Pipeline>,
    schedule: ScheduleSpec,
    manual_timeout: Duration,
}

struct Shared {
    state: Mutex<SchedulerState>,
    core: Option<Core>,
    diagnostics: Arc<Diagnostics>,
    next_run_id: AtomicU64,
    shutdown: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// Held for the whole life of a run. Dropping it (normal end, error or
/// panic unwind) re-arms the scheduler.
pub struct FiringGuard {
    shared: Arc<Shared>,
    pipeline: Arc<Pipeline>,
    run_id: RunId,
    trigger: Trigger,
}

impl FiringGuard {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        if matches!(*state, SchedulerState::Firing { run_id, .. } if run_id == self.run_id) {
            *state = match &self.shared.core {
                Some(core) => SchedulerState::Armed {
                    next_fire: core.schedule.next_fire_after(Utc::now()),
                },
                None => SchedulerState::Idle,
            };
        }
    }
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        schedule: ScheduleSpec,
        manual_timeout: Duration,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self::with_core(
            SchedulerState::Idle,
            Some(Core {
                pipeline,
                schedule,
                manual_timeout,
            }),
            diagnostics,
        )
    }

    /// Configuration is unusable: never arms, but still answers health and
    /// diagnostics.
    pub fn disarmed(reason: impl Into<String>, diagnostics: Arc<Diagnostics>) -> Self {
        Self::with_core(
            SchedulerState::Disarmed {
                reason: reason.into(),
            },
            None,
            diagnostics,
        )
    }

    fn with_core(state: SchedulerState, core: Option<Core>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                core,
                diagnostics,
                next_run_id: AtomicU64::new(1),
                shutdown: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state().clone()
    }

    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.shared.core.as_ref().map(|c| &c.pipeline)
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.shared.diagnostics
    }

    /// Compute the next fire strictly after `after` and move to Armed.
    /// A Firing scheduler stays Firing (its guard re-arms on completion).
    pub fn arm(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, TriggerError> {
        let core = self.core()?;
        let next_fire = core.schedule.next_fire_after(after);
        let mut state = self.shared.state();
        match &*state {
            SchedulerState::Disarmed { reason } => Err(TriggerError::NotArmed(reason.clone())),
            SchedulerState::Firing { .. } => Ok(next_fire),
            _ => {
                *state = SchedulerState::Armed { next_fire };
                Ok(next_fire)
            }
        }
    }

    fn core(&self) -> Result<&Core, TriggerError> {
        self.shared.core.as_ref().ok_or_else(|| match self.state() {
            SchedulerState::Disarmed { reason } => TriggerError::NotArmed(reason),
            _ => TriggerError::NotArmed("no pipeline configured".into()),
        })
    }

    /// The single-flight check: only an Armed scheduler may start a run.
    pub fn try_begin(&self, trigger: Trigger) -> Result<FiringGuard, TriggerError> {
        let core = self.core()?;
        let mut state = self.shared.state();
        match &*state {
            SchedulerState::Armed { .. } => {
                let run_id = self.shared.next_run_id.fetch_add(1, Ordering::SeqCst);
                *state = SchedulerState::Firing { run_id, trigger };
                Ok(FiringGuard {
                    shared: self.shared.clone(),
                    pipeline: core.pipeline.clone(),
                    run_id,
                    trigger,
                })
            }
            SchedulerState::Firing { .. } => Err(TriggerError::Busy),
            SchedulerState::Idle => Err(TriggerError::NotArmed("scheduler not started".into())),
            SchedulerState::Disarmed { reason } => Err(TriggerError::NotArmed(reason.clone())),
        }
    }

    /// Execute the run owned by `guard` on its own task. A panicking run is
    /// recorded as Failed.
    pub fn spawn_run(&self, guard: FiringGuard) -> JoinHandle<DigestRun> {
        let diagnostics = self.shared.diagnostics.clone();
        tokio::spawn(async move {
            let (run_id, trigger) = (guard.run_id, guard.trigger);
            let started_at = Utc::now();
            let pipeline = guard.pipeline.clone();
            let task = tokio::spawn(async move { pipeline.execute(run_id, trigger).await });
            let run = match task.await {
                Ok(run) => run,
                Err(e) => {
                    let mut run = diagnostics
                        .run(run_id)
                        .unwrap_or_else(|| DigestRun::new(run_id, trigger, started_at));
                    run.status = RunStatus::Failed;
                    run.finished_at = Some(Utc::now());
                    run.error = Some(format!("run task aborted: {e}"));
                    diagnostics.upsert_run(&run);
                    counter!("digest_runs_total", "status" => RunStatus::Failed.label()).increment(1);
                    tracing::error!(target: "scheduler", run_id, error = %e, "run task aborted");
                    run
                }
            };
            drop(guard);
            run
        })
    }

    /// Manual trigger: blocks up to the configured bound, then hands back
    /// the run id while the run keeps going.
    pub async fn trigger_manual(&self) -> Result<ManualOutcome, TriggerError> {
        let timeout = self.core()?.manual_timeout;
        let guard = match self.try_begin(Trigger::Manual) {
            Ok(g) => g,
            Err(e) => {
                tracing::info!(target: "scheduler", reason = %e, "manual trigger rejected");
                return Err(e);
            }
        };
        let run_id = guard.run_id;
        let handle = self.spawn_run(guard);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(run)) => Ok(ManualOutcome::Finished(run)),
            Ok(Err(e)) => Err(TriggerError::Failed(e.to_string())),
            Err(_) => {
                tracing::info!(target: "scheduler", run_id, "manual trigger timed out; run continues");
                Ok(ManualOutcome::StillRunning { run_id })
            }
        }
    }

    /// Scheduled fire. Skipped (and logged) when a run is already in flight.
    pub async fn fire_scheduled(&self) -> Option<DigestRun> {
        let guard = match self.try_begin(Trigger::Scheduled) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(target: "scheduler", reason = %e, "scheduled fire skipped");
                return None;
            }
        };
        self.spawn_run(guard).await.ok()
    }

    /// Arm and spawn the wait-and-fire loop. Disarmed schedulers return `None`.
    pub fn start(&self, run_on_startup: bool) -> Option<JoinHandle<()>> {
        match self.arm(Utc::now()) {
            Ok(next_fire) => {
                tracing::info!(target: "scheduler", next_fire = %next_fire, "scheduler armed");
            }
            Err(e) => {
                tracing::error!(target: "scheduler", reason = %e, "scheduler not started");
                return None;
            }
        }
        if run_on_startup {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.trigger_manual().await {
                    tracing::warn!(target: "scheduler", error = %e, "startup run not started");
                }
            });
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.run_loop().await }))
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.notify_one();
    }

    async fn run_loop(self) {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_EVERY);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        // Never re-arm at or before a target that already fired, even if the
        // timer woke slightly ahead of the wall clock.
        let mut floor = Utc::now();
        loop {
            let Ok(next_fire) = self.arm(floor.max(Utc::now())) else {
                return;
            };
            let wait = (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    floor = next_fire;
                    self.fire_scheduled().await;
                }
                _ = heartbeat.tick() => {
                    if let SchedulerState::Armed { next_fire } = self.state() {
                        tracing::info!(target: "scheduler", next_fire = %next_fire, "heartbeat: armed and waiting");
                    }
                }
                _ = self.shared.shutdown.notified() => {
                    let mut state = self.shared.state();
                    if matches!(*state, SchedulerState::Armed { .. }) {
                        *state = SchedulerState::Idle;
                    }
                    drop(state);
                    tracing::info!(target: "scheduler", "scheduler stopped");
                    return;
                }
            }
        }
    }

    pub fn health(&self) -> Health {
        let scheduler = self.state();
        let core = self.shared.core.as_ref();
        let next_fire = match &scheduler {
            SchedulerState::Armed { next_fire } => Some(*next_fire),
            SchedulerState::Disarmed { .. } => None,
            _ => core.map(|c| c.schedule.next_fire_after(Utc::now())),
        };
        let last = self.shared.diagnostics.last_finished();
        Health {
            status: if core.is_some() { "ok" } else { "degraded" },
            schedule: core.map(|c| c.schedule.describe()),
            next_fire,
            last_run_at: last.as_ref().and_then(|r| r.finished_at),
            last_run_status: last.map(|r| r.status),
            transport: core.map(|c| c.pipeline.mailer().transport_kind().label()),
            scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_scheduler_rejects_everything() {
        let s = Scheduler::disarmed("missing credential: SENDER_EMAIL", Arc::new(Diagnostics::new(10, 10)));
        assert!(matches!(s.arm(Utc::now()), Err(TriggerError::NotArmed(_))));
        assert!(matches!(
            s.try_begin(Trigger::Manual),
            Err(TriggerError::NotArmed(r)) if r.contains("SENDER_EMAIL")
        ));
        let h = s.health();
        assert_eq!(h.status, "degraded");
        assert_eq!(h.scheduler.label(), "disarmed");
        assert!(h.next_fire.is_none());
    }

    #[test]
    fn state_serializes_with_tag() {
        let v = serde_json::to_value(SchedulerState::Firing {
            run_id: 3,
            trigger: Trigger::Manual,
        })
        .unwrap();
        assert_eq!(v["state"], "firing");
        assert_eq!(v["run_id"], 3);
    }
}
