// tests/extract_fixtures.rs
//
// Extractors + filter over realistic saved pages and feeds.

mod common;

use chrono::{TimeZone, Utc};

use common::source;
use news_digest::ingest::filter::FilterAndDedup;
use news_digest::ingest::providers::extractor_for;
use news_digest::ingest::types::{RawContent, SourceKind};

fn raw(body: &str, url: &str, content_type: &str) -> RawContent {
    RawContent {
        body: body.to_string(),
        url: url.to_string(),
        content_type: Some(content_type.to_string()),
        fetched_at: Utc.with_ymd_and_hms(2025, 9, 4, 6, 0, 0).unwrap(),
    }
}

#[test]
fn rss_fixture_drops_undated_and_resolves_links() {
    let body = include_str!("fixtures/blog_rss.xml");
    let src = source("Blog", "https://blog.example.com/feed".into(), SourceKind::Feed, &[]);
    let articles = extractor_for(SourceKind::Feed)
        .extract(&raw(body, "https://blog.example.com/feed", "application/rss+xml"), &src)
        .expect("rss parses");

    let titles: Vec<&str> = articles.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(
        titles,
        [
            "Shipping Rust services to production",
            "Quarterly hiring update",
            "Async Rust patterns we keep reaching for",
        ]
    );

    let first = &articles[0];
    assert_eq!(first.summary, "How we moved our ingest tier to Rust & tokio.");
    assert_eq!(first.image_url.as_deref(), Some("https://blog.example.com/img/rust.png"));
    assert_eq!(
        first.published_at,
        Utc.with_ymd_and_hms(2025, 9, 2, 9, 30, 0).unwrap()
    );

    let third = &articles[2];
    assert_eq!(third.canonical_url, "https://blog.example.com/posts/async-patterns");
    // Several thumbnail sizes: the first one wins.
    assert_eq!(third.image_url.as_deref(), Some("https://cdn.example.com/async.jpg"));
}

#[test]
fn rss_fixture_keywords_then_filter() {
    let body = include_str!("fixtures/blog_rss.xml");
    let src = source("Blog", "https://blog.example.com/feed".into(), SourceKind::Feed, &["rust"]);
    let candidates = extractor_for(SourceKind::Feed)
        .extract(&raw(body, "https://blog.example.com/feed", "application/rss+xml"), &src)
        .expect("rss parses");
    assert_eq!(candidates.len(), 2);

    // Seven-day window ending at the run start drops the August post.
    let run_started_at = Utc.with_ymd_and_hms(2025, 9, 4, 6, 0, 0).unwrap();
    let kept = FilterAndDedup::new().filter(candidates, &src, 0, run_started_at);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].canonical_url, "https://blog.example.com/posts/rust-in-prod");
}

#[test]
fn atom_fixture_uses_media_group() {
    let body = include_str!("fixtures/channel_atom.xml");
    let src = source("Channel", "https://video.example.com/feed".into(), SourceKind::Feed, &[]);
    let articles = extractor_for(SourceKind::Feed)
        .extract(&raw(body, "https://video.example.com/feed", "application/atom+xml"), &src)
        .expect("atom parses");

    assert_eq!(articles.len(), 2);
    let ep = &articles[0];
    assert_eq!(ep.title, "Episode 42: Rust at the edge");
    assert_eq!(ep.canonical_url, "https://video.example.com/watch?v=abc42");
    assert_eq!(ep.summary, "We deploy a Rust service to edge nodes.");
    assert_eq!(ep.image_url.as_deref(), Some("https://i.example.com/abc42/hq.jpg"));
    // `published` wins over `updated`.
    assert_eq!(ep.published_at, Utc.with_ymd_and_hms(2025, 9, 3, 10, 0, 0).unwrap());
    // Only `updated` present.
    assert_eq!(
        articles[1].published_at,
        Utc.with_ymd_and_hms(2025, 8, 27, 10, 0, 0).unwrap()
    );
}

#[test]
fn html_fixture_scrapes_article_blocks() {
    let body = include_str!("fixtures/press_page.html");
    let src = source("Newsroom", "https://example.com/news".into(), SourceKind::Html, &[]);
    let articles = extractor_for(SourceKind::Html)
        .extract(&raw(body, "https://example.com/news", "text/html"), &src)
        .expect("html parses");

    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].title, "Example Corp launches Rust SDK");
    assert_eq!(articles[0].canonical_url, "https://example.com/news/rust-sdk-launch");
    assert_eq!(
        articles[0].summary,
        "The new SDK brings first-class async support for Rust developers."
    );
    assert_eq!(articles[0].image_url.as_deref(), Some("https://example.com/media/sdk.png"));
    assert_eq!(
        articles[1].published_at,
        Utc.with_ymd_and_hms(2025, 8, 30, 0, 0, 0).unwrap()
    );
}

#[test]
fn feed_fed_to_html_extractor_is_not_fatal_to_the_caller() {
    let src = source("Wrong", "https://example.com/feed".into(), SourceKind::Html, &[]);
    let res = extractor_for(SourceKind::Html).extract(
        &raw("{\"not\":\"html\"}", "https://example.com/feed", "application/json"),
        &src,
    );
    assert!(res.is_err());
}
