// src/api.rs
//! Management surface: trigger, test send, diagnostics, run history, health.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::env_presence;
use crate::diagnostics::LogLine;
use crate::errors::TriggerError;
use crate::ingest::types::Source;
use crate::notify::DeliveryResult;
use crate::scheduler::{ManualOutcome, Scheduler, SchedulerState};

const DEFAULT_LINES: usize = 100;
const DEFAULT_RUNS: usize = 20;

#[derive(Clone)]
pub struct AppState {
    scheduler: Scheduler,
    sources: Arc<Vec<Source>>,
}

impl AppState {
    pub fn new(scheduler: Scheduler, sources: Vec<Source>) -> Self {
        Self {
            scheduler,
            sources: Arc::new(sources),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/run", post(trigger_run))
        .route("/api/test-email", post(test_email))
        .route("/api/diagnostics", get(diagnostics))
        .route("/api/runs", get(runs))
        .route("/api/sources", get(sources))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.scheduler.health()).into_response()
}

fn error_body(status: StatusCode, e: &TriggerError) -> Response {
    let code = match e {
        TriggerError::Busy => "busy",
        TriggerError::NotArmed(_) => "not_armed",
        TriggerError::Failed(_) => "failed",
    };
    (status, Json(json!({ "error": code, "detail": e.to_string() }))).into_response()
}

async fn trigger_run(State(state): State<AppState>) -> Response {
    match state.scheduler.trigger_manual().await {
        Ok(ManualOutcome::Finished(run)) => Json(run.summary()).into_response(),
        Ok(ManualOutcome::StillRunning { run_id }) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "running", "run_id": run_id })),
        )
            .into_response(),
        Err(e @ TriggerError::Busy) => error_body(StatusCode::CONFLICT, &e),
        Err(e @ TriggerError::NotArmed(_)) => error_body(StatusCode::SERVICE_UNAVAILABLE, &e),
        Err(e @ TriggerError::Failed(_)) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn test_email(State(state): State<AppState>) -> Response {
    let Some(pipeline) = state.scheduler.pipeline() else {
        let reason = match state.scheduler.state() {
            SchedulerState::Disarmed { reason } => reason,
            other => other.label().to_string(),
        };
        return error_body(StatusCode::SERVICE_UNAVAILABLE, &TriggerError::NotArmed(reason));
    };
    match pipeline.send_test_message().await {
        Ok(report) => {
            let status = if report.result == DeliveryResult::Sent {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            (status, Json(report)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "compose", "detail": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct LinesQuery {
    lines: Option<usize>,
}

#[derive(Serialize)]
struct DiagnosticsResp {
    scheduler: SchedulerState,
    env: BTreeMap<&'static str, bool>,
    lines: Vec<LogLine>,
}

async fn diagnostics(State(state): State<AppState>, Query(q): Query<LinesQuery>) -> Json<DiagnosticsResp> {
    let n = q.lines.unwrap_or(DEFAULT_LINES);
    Json(DiagnosticsResp {
        scheduler: state.scheduler.state(),
        env: env_presence(),
        lines: state.scheduler.diagnostics().last_logs(n),
    })
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn runs(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_RUNS);
    Json(state.scheduler.diagnostics().runs(limit)).into_response()
}

async fn sources(State(state): State<AppState>) -> Json<Vec<Source>> {
    Json(state.sources.as_ref().clone())
}
