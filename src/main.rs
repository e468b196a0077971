//! News digest service: binary entrypoint.
//! Boots logging and configuration, arms the scheduler and serves the
//! management routes.

use anyhow::Context;
use std::sync::Arc;

use news_digest::api::{self, AppState};
use news_digest::app::{bootstrap, init_tracing};
use news_digest::config::ServerSettings;
use news_digest::diagnostics::Diagnostics;
use news_digest::metrics::Metrics;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = ?e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let server = ServerSettings::from_env();
    let diagnostics = Arc::new(Diagnostics::new(server.log_capacity, server.history_capacity));
    init_tracing(diagnostics.clone());

    let metrics = Metrics::init().context("install prometheus recorder")?;

    let boot = bootstrap(diagnostics);
    let scheduler = boot.scheduler.clone();
    let loop_handle = scheduler.start(boot.run_on_startup);

    let app = api::router(AppState::new(boot.scheduler, boot.sources)).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server.port))
        .await
        .with_context(|| format!("bind port {}", server.port))?;
    tracing::info!(port = server.port, "management server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    scheduler.shutdown();
    if let Some(h) = loop_handle {
        let _ = h.await;
    }
    Ok(())
}
