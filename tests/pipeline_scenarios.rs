// tests/pipeline_scenarios.rs
//
// End-to-end runs: wiremock sources -> filter -> compose -> recording transport.
//
// Covered:
// - one source timing out while the others deliver
// - no qualifying articles still sends the empty-period notice
// - cross-source duplicates keep the first-declared source
// - delivery failure semantics (all recipients vs some, malformed address)
// - a permanently throttled source still lets the run finish
// - re-running ingest with the same clock is stable

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{pipeline_with, rss, source, RecordingTransport};
use news_digest::digest::EMPTY_NOTICE;
use news_digest::errors::TransportError;
use news_digest::ingest::config::SourceRegistry;
use news_digest::ingest::fetcher::Fetcher;
use news_digest::ingest::run_once;
use news_digest::ingest::types::{FailureKind, SourceKind, SourceOutcome};
use news_digest::notify::DeliveryResult;
use news_digest::run::{RunStatus, Trigger};

async fn mount_feed(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn one_source_times_out_others_are_delivered() {
    let server = MockServer::start().await;
    let yesterday = Utc::now() - ChronoDuration::days(1);

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    mount_feed(
        &server,
        "/alpha",
        rss(&[
            ("Alpha one", "https://alpha.test/1", yesterday),
            ("Alpha two", "https://alpha.test/2", yesterday),
        ]),
    )
    .await;
    mount_feed(
        &server,
        "/beta",
        rss(&[
            ("Beta one", "https://beta.test/1", yesterday),
            ("Beta two", "https://beta.test/2", yesterday),
        ]),
    )
    .await;

    let sources = vec![
        source("Slow Wire", format!("{}/slow", server.uri()), SourceKind::Html, &[]),
        source("Alpha", format!("{}/alpha", server.uri()), SourceKind::Feed, &[]),
        source("Beta", format!("{}/beta", server.uri()), SourceKind::Feed, &[]),
    ];
    let transport = Arc::new(RecordingTransport::default());
    let (pipeline, diagnostics) = pipeline_with(sources, transport.clone(), &["reader@example.com"]);

    let run = pipeline.execute(1, Trigger::Manual).await;

    assert_eq!(run.status, RunStatus::DeliveredWithErrors);
    assert_eq!(run.articles.len(), 4);
    assert!(run.finished_at.is_some());
    assert!(run.error.is_none());

    let failures: Vec<_> = run
        .source_outcomes
        .iter()
        .filter(|r| r.outcome.is_failure())
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].source, "Slow Wire");
    assert!(matches!(
        failures[0].outcome,
        SourceOutcome::Failure {
            failure: FailureKind::Timeout,
            ..
        }
    ));

    // History holds the same terminal record.
    let recorded = diagnostics.run(1).expect("run recorded");
    assert_eq!(recorded.status, RunStatus::DeliveredWithErrors);
    assert_eq!(recorded.failed_sources(), vec!["Slow Wire"]);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "reader@example.com");
    assert!(sent[0].formatted.contains("(4 updates)"));
}

#[tokio::test]
async fn empty_period_sends_notice_and_completes() {
    let server = MockServer::start().await;
    let yesterday = Utc::now() - ChronoDuration::days(1);
    mount_feed(
        &server,
        "/garden",
        rss(&[("Tomatoes in autumn", "https://garden.test/1", yesterday)]),
    )
    .await;

    let sources = vec![source(
        "Garden",
        format!("{}/garden", server.uri()),
        SourceKind::Feed,
        &["rust"],
    )];
    let transport = Arc::new(RecordingTransport::default());
    let (pipeline, _) = pipeline_with(sources, transport.clone(), &["reader@example.com"]);

    let run = pipeline.execute(7, Trigger::Scheduled).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.articles.is_empty());
    assert_eq!(
        run.source_outcomes[0].outcome,
        SourceOutcome::Success { articles: 0 }
    );

    let sent = transport.sent();
    assert_eq!(sent.len(), 1, "the empty digest is still sent");
    assert!(sent[0].formatted.contains(EMPTY_NOTICE));
    assert!(sent[0].formatted.contains("(0 updates)"));
}

#[tokio::test]
async fn duplicate_link_is_kept_under_first_declared_source() {
    let server = MockServer::start().await;
    let yesterday = Utc::now() - ChronoDuration::days(1);
    mount_feed(
        &server,
        "/first",
        rss(&[("Shared story", "https://news.test/story", yesterday)]),
    )
    .await;
    mount_feed(
        &server,
        "/second",
        rss(&[
            ("Shared story (syndicated)", "https://news.test/story/?utm_source=partner", yesterday),
            ("Only here", "https://news.test/other", yesterday),
        ]),
    )
    .await;

    let sources = vec![
        source("First", format!("{}/first", server.uri()), SourceKind::Feed, &[]),
        source("Second", format!("{}/second", server.uri()), SourceKind::Feed, &[]),
    ];
    let transport = Arc::new(RecordingTransport::default());
    let (pipeline, _) = pipeline_with(sources, transport, &["reader@example.com"]);

    let run = pipeline.execute(1, Trigger::Manual).await;

    assert_eq!(run.status, RunStatus::Completed);
    let shared: Vec<_> = run
        .articles
        .iter()
        .filter(|a| a.canonical_url == "https://news.test/story")
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].source_name, "First");
    assert_eq!(run.articles.len(), 2);
}

#[tokio::test]
async fn every_recipient_failing_fails_the_run() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", rss(&[])).await;

    let sources = vec![source("Feed", format!("{}/feed", server.uri()), SourceKind::Feed, &[])];
    let transport = Arc::new(RecordingTransport::failing_with(vec![
        TransportError::AuthError("535 bad credentials".into()),
        TransportError::AuthError("535 bad credentials".into()),
    ]));
    let (pipeline, _) = pipeline_with(sources, transport.clone(), &["reader@example.com"]);

    let run = pipeline.execute(1, Trigger::Manual).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().is_some_and(|e| e.contains("535")));
    assert_eq!(run.delivery_attempts.len(), 2, "one in-run retry per recipient");
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn one_recipient_failing_is_delivered_with_errors() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", rss(&[])).await;

    let sources = vec![source("Feed", format!("{}/feed", server.uri()), SourceKind::Feed, &[])];
    // The first recipient burns both scripted failures; the second succeeds.
    let transport = Arc::new(RecordingTransport::failing_with(vec![
        TransportError::NetworkError("connection reset".into()),
        TransportError::NetworkError("connection reset".into()),
    ]));
    let (pipeline, _) = pipeline_with(
        sources,
        transport.clone(),
        &["first@example.com", "second@example.com"],
    );

    let run = pipeline.execute(1, Trigger::Manual).await;

    assert_eq!(run.status, RunStatus::DeliveredWithErrors);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "second@example.com");
}

#[tokio::test]
async fn ingest_is_stable_for_a_fixed_run_start() {
    let server = MockServer::start().await;
    let yesterday = Utc::now() - ChronoDuration::days(1);
    mount_feed(
        &server,
        "/feed",
        rss(&[
            ("B story", "https://stable.test/b", yesterday),
            ("A story", "https://stable.test/a", yesterday),
            ("Old story", "https://stable.test/old", yesterday - ChronoDuration::days(30)),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(
                    r#"<html><body><article><h2><a href="/p/1">Undated post</a></h2></article></body></html>"#,
                ),
        )
        .mount(&server)
        .await;

    let registry = SourceRegistry::new(vec![
        source("Feed", format!("{}/feed", server.uri()), SourceKind::Feed, &[]),
        source("Page", format!("{}/page", server.uri()), SourceKind::Html, &[]),
    ])
    .expect("valid sources");
    let fetcher = Fetcher::new(common::fast_policy()).expect("client");
    let run_started_at = Utc::now();

    let key = |r: &news_digest::ingest::IngestReport| {
        r.articles
            .iter()
            .map(|a| (a.canonical_url.clone(), a.title.clone(), a.published_at))
            .collect::<Vec<_>>()
    };
    let first = run_once(&fetcher, &registry, run_started_at).await;
    let second = run_once(&fetcher, &registry, run_started_at).await;

    assert_eq!(key(&first), key(&second));
    assert_eq!(first.articles.len(), 3);
    // Same timestamp: title breaks the tie.
    assert_eq!(first.articles[0].title, "A story");
    // Page articles without a timestamp never sit after the run start.
    assert!(first.articles.iter().all(|a| a.published_at <= run_started_at));
}

#[tokio::test]
async fn rate_limited_source_still_reaches_terminal_status() {
    let server = MockServer::start().await;
    // fast_policy: one retry, so two attempts.
    Mock::given(method("GET"))
        .and(path("/throttled"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let sources = vec![source(
        "Throttled",
        format!("{}/throttled", server.uri()),
        SourceKind::Feed,
        &[],
    )];
    let transport = Arc::new(RecordingTransport::default());
    let (pipeline, _) = pipeline_with(sources, transport.clone(), &["reader@example.com"]);

    let run = pipeline.execute(1, Trigger::Scheduled).await;

    assert!(run.status.is_terminal());
    assert_eq!(run.status, RunStatus::DeliveredWithErrors);
    assert!(matches!(
        run.source_outcomes[0].outcome,
        SourceOutcome::Failure {
            failure: FailureKind::RateLimited,
            ..
        }
    ));
    assert!(transport.sent()[0].formatted.contains(EMPTY_NOTICE));
}

#[tokio::test]
async fn malformed_recipient_does_not_sink_the_others() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", rss(&[])).await;

    let sources = vec![source("Feed", format!("{}/feed", server.uri()), SourceKind::Feed, &[])];
    let transport = Arc::new(RecordingTransport::default());
    let (pipeline, _) = pipeline_with(
        sources,
        transport.clone(),
        &["good@example.com", "typo-at-example.com"],
    );

    let run = pipeline.execute(1, Trigger::Manual).await;

    assert_eq!(run.status, RunStatus::DeliveredWithErrors);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "good@example.com");
    let bad: Vec<_> = run
        .delivery_attempts
        .iter()
        .filter(|a| a.recipient == "typo-at-example.com")
        .collect();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].result, DeliveryResult::InvalidAddress);
}
