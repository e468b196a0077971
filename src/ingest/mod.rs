// src/ingest/mod.rs
pub mod config;
pub mod fetcher;
pub mod filter;
pub mod providers;
pub mod rate_limit;
pub mod types;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::ingest::config::SourceRegistry;
use crate::ingest::fetcher::Fetcher;
use crate::ingest::filter::FilterAndDedup;
use crate::ingest::providers::extractor_for;
use crate::ingest::types::{Article, FailureKind, FetchOutcome, Source, SourceOutcome};

pub const SUMMARY_CAP_FEED: usize = 300;
pub const SUMMARY_CAP_HTML: usize = 200;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_fetch_attempts_total", "HTTP attempts made against sources.");
        describe_counter!(
            "digest_source_failures_total",
            "Sources marked failed for a run, by failure kind."
        );
        describe_counter!("digest_articles_kept_total", "Articles kept after filtering.");
        describe_counter!(
            "digest_articles_dropped_total",
            "Articles dropped, by reason (stale/duplicate/undated)."
        );
        describe_counter!(
            "digest_delivery_attempts_total",
            "Delivery attempts by transport and result."
        );
        describe_counter!("digest_runs_total", "Finished runs by terminal status.");
        describe_histogram!("digest_fetch_ms", "Source fetch latency in milliseconds.");
        describe_gauge!("digest_last_run_ts", "Unix ts when the last run finished.");
    });
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("static tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static ws regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Cap at `max` chars, marking the cut with "...".
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head.trim_end())
}

/// Feed summaries: markup removed, double-escaped entities decoded, capped.
pub fn clean_summary(html: &str, cap: usize) -> String {
    let once = normalize_text(html);
    // Some feeds escape their markup twice.
    let twice = if once.contains('<') || once.contains('&') {
        normalize_text(&once)
    } else {
        once
    };
    truncate_chars(&twice, cap)
}

/// Per-run ingest result: one outcome per enabled source (declaration order)
/// and the concatenated, filtered article list.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub outcomes: Vec<(String, SourceOutcome)>,
    pub articles: Vec<Article>,
}

impl IngestReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(n, _)| n.as_str())
    }
}

enum Collected {
    Articles(Vec<Article>),
    Failed(FailureKind, String),
}

async fn collect_source(fetcher: &Fetcher, source: &Source) -> Collected {
    let raw = match fetcher.fetch(source).await {
        FetchOutcome::Success(raw) => raw,
        FetchOutcome::Failure { kind, detail } => return Collected::Failed(kind, detail),
    };
    match extractor_for(source.kind).extract(&raw, source) {
        Ok(articles) => Collected::Articles(articles),
        Err(e) => {
            tracing::warn!(target: "extract", source = %source.name, error = %e, "extract failed");
            counter!("digest_source_failures_total", "kind" => FailureKind::ParseFailure.label())
                .increment(1);
            Collected::Failed(FailureKind::from(&e), e.to_string())
        }
    }
}

/// Fetch + extract every enabled source (bounded concurrency, results kept in
/// declaration order), then filter each source in that order so cross-source
/// dedup keeps the first-declared occurrence.
pub async fn run_once(
    fetcher: &Fetcher,
    registry: &SourceRegistry,
    run_started_at: DateTime<Utc>,
) -> IngestReport {
    ensure_metrics_described();

    let concurrency = fetcher.policy().concurrency.max(1);
    let pending: Vec<_> = registry
        .enabled()
        .map(|(priority, source)| async move {
            (priority, source, collect_source(fetcher, source).await)
        })
        .collect();
    let collected: Vec<(usize, &Source, Collected)> = stream::iter(pending)
        .buffered(concurrency)
        .collect()
        .await;

    let mut dedup = FilterAndDedup::new();
    let mut report = IngestReport::default();
    for (priority, source, result) in collected {
        match result {
            Collected::Articles(candidates) => {
                let kept = dedup.filter(candidates, source, priority, run_started_at);
                counter!("digest_articles_kept_total").increment(kept.len() as u64);
                report
                    .outcomes
                    .push((source.name.clone(), SourceOutcome::Success { articles: kept.len() }));
                report.articles.extend(kept);
            }
            Collected::Failed(failure, detail) => {
                report
                    .outcomes
                    .push((source.name.clone(), SourceOutcome::Failure { failure, detail }));
            }
        }
    }
    report
}
