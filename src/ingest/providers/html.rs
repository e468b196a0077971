// src/ingest/providers/html.rs
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::feed::parse_feed_date;
use super::{resolve_url, Extractor};
use crate::errors::ExtractError;
use crate::ingest::types::{Article, RawContent, Source};
use crate::ingest::{normalize_text, truncate_chars, SUMMARY_CAP_HTML};

/// Containers tried in order; the first selector with any match wins.
const CONTAINER_SELECTORS: &[&str] = &[
    "article",
    ".post",
    ".article",
    ".entry",
    "[class*=\"post\"]",
    "[class*=\"article\"]",
    ".search-result",
    ".story",
];

const MAX_CONTAINERS: usize = 10;

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

static CONTAINERS: Lazy<Vec<Selector>> =
    Lazy::new(|| CONTAINER_SELECTORS.iter().map(|s| sel(s)).collect());
static TITLE: Lazy<Selector> = Lazy::new(|| sel("h1, h2, h3, h4, a"));
static LINK: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static SNIPPET: Lazy<Selector> = Lazy::new(|| {
    sel("p[class*=\"excerpt\"], p[class*=\"summary\"], div[class*=\"excerpt\"], div[class*=\"summary\"]")
});
static TIME: Lazy<Selector> = Lazy::new(|| sel("time[datetime]"));
static IMG: Lazy<Selector> = Lazy::new(|| sel("img[src]"));

/// Title/snippet pairs scraped from listing pages. Pages rarely expose a
/// machine-readable timestamp; without a `<time datetime>` the article is
/// stamped with `fetched_at`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn extract(&self, raw: &RawContent, source: &Source) -> Result<Vec<Article>, ExtractError> {
        if let Some(ct) = raw.content_type.as_deref() {
            let ct = ct.to_ascii_lowercase();
            if !(ct.contains("html") || ct.contains("xml") || ct.starts_with("text/")) {
                return Err(ExtractError::UnsupportedFormat(ct));
            }
        }
        if raw.body.trim().is_empty() {
            return Err(ExtractError::ParseFailure("empty page".into()));
        }

        let doc = Html::parse_document(&raw.body);
        let mut out = Vec::new();
        for container in CONTAINERS.iter() {
            let elements: Vec<ElementRef> = doc.select(container).take(MAX_CONTAINERS).collect();
            if elements.is_empty() {
                continue;
            }
            for el in elements {
                if let Some(article) = article_from(el, raw, source) {
                    out.push(article);
                }
            }
            break;
        }

        tracing::debug!(target: "extract", source = %source.name, found = out.len(), "html scan done");
        Ok(out)
    }
}

fn article_from(el: ElementRef, raw: &RawContent, source: &Source) -> Option<Article> {
    let title = normalize_text(&el.select(&TITLE).next()?.text().collect::<String>());
    if title.is_empty() {
        return None;
    }
    let href = el.select(&LINK).next()?.value().attr("href")?;
    let url = resolve_url(&raw.url, href)?;

    let snippet = el
        .select(&SNIPPET)
        .next()
        .map(|s| truncate_chars(&normalize_text(&s.text().collect::<String>()), SUMMARY_CAP_HTML))
        .unwrap_or_default();

    if !source.matches_keywords(&[&title, &snippet]) {
        return None;
    }

    let published_at = el
        .select(&TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(parse_page_date)
        .unwrap_or(raw.fetched_at);

    let image_url = el
        .select(&IMG)
        .next()
        .and_then(|i| i.value().attr("src"))
        .and_then(|src| resolve_url(&raw.url, src));

    Some(Article {
        source_name: source.name.clone(),
        title,
        canonical_url: url,
        published_at,
        summary: snippet,
        image_url,
        fetched_at: raw.fetched_at,
    })
}

fn parse_page_date(s: &str) -> Option<DateTime<Utc>> {
    parse_feed_date(s).or_else(|| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}
