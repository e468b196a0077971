// src/app.rs
//! Process wiring shared by the binaries: logging, configuration, scheduler.

use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Settings;
use crate::diagnostics::{Diagnostics, DiagnosticsLayer};
use crate::errors::{ConfigError, ConfigResult};
use crate::ingest::config::SourceRegistry;
use crate::ingest::fetcher::Fetcher;
use crate::ingest::types::Source;
use crate::notify::{select_transport, Mailer};
use crate::pipeline::Pipeline;
use crate::scheduler::Scheduler;

pub const DEFAULT_LOG_FILTER: &str = "news_digest=info,warn";

/// Compact (or `LOG_FORMAT=json`) console output plus the diagnostics ring
/// buffer. `RUST_LOG` overrides the default filter.
pub fn init_tracing(diagnostics: Arc<Diagnostics>) {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .with(DiagnosticsLayer::new(diagnostics))
        .try_init();
}

pub fn build_pipeline(
    settings: &Settings,
    registry: SourceRegistry,
    diagnostics: Arc<Diagnostics>,
) -> ConfigResult<Pipeline> {
    let transport = select_transport(&settings.delivery)?;
    let fetcher = Fetcher::new(settings.fetch.clone())
        .map_err(|e| ConfigError::Parse(format!("http client: {e}")))?;
    let mailer = Mailer::new(
        transport,
        settings.delivery.sender.clone(),
        settings.delivery.recipients.clone(),
    );
    Ok(Pipeline::new(
        Arc::new(registry),
        fetcher,
        mailer,
        settings.digest_title.clone(),
        diagnostics,
    )
    .with_timezone(settings.schedule.tz))
}

pub struct Bootstrap {
    pub scheduler: Scheduler,
    pub sources: Vec<Source>,
    pub run_on_startup: bool,
}

/// Load everything from the environment. Any configuration error yields a
/// disarmed scheduler instead of aborting the process.
pub fn bootstrap(diagnostics: Arc<Diagnostics>) -> Bootstrap {
    let loaded = Settings::from_env().and_then(|settings| {
        let registry = SourceRegistry::load_default()?;
        let sources = registry.all().to_vec();
        let pipeline = build_pipeline(&settings, registry, diagnostics.clone())?;
        Ok((settings, sources, pipeline))
    });

    match loaded {
        Ok((settings, sources, pipeline)) => {
            tracing::info!(
                sources = sources.len(),
                schedule = %settings.schedule.describe(),
                recipients = settings.delivery.recipients.len(),
                "configuration loaded"
            );
            Bootstrap {
                scheduler: Scheduler::new(
                    Arc::new(pipeline),
                    settings.schedule,
                    settings.manual_trigger_timeout,
                    diagnostics,
                ),
                sources,
                run_on_startup: settings.run_on_startup,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid; scheduler disarmed");
            let sources = SourceRegistry::load_default()
                .map(|r| r.all().to_vec())
                .unwrap_or_default();
            Bootstrap {
                scheduler: Scheduler::disarmed(e.to_string(), diagnostics),
                sources,
                run_on_startup: false,
            }
        }
    }
}
