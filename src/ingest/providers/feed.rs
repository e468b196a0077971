// src/ingest/providers/feed.rs
use chrono::{DateTime, Utc};
use metrics::counter;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use super::{first_img_src, resolve_url, Extractor};
use crate::errors::ExtractError;
use crate::ingest::types::{Article, RawContent, Source};
use crate::ingest::{clean_summary, normalize_text, SUMMARY_CAP_FEED};

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date")]
    dc_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "media:thumbnail", default)]
    media_thumbnail: Vec<MediaRef>,
    #[serde(rename = "media:content", default)]
    media_content: Vec<MediaRef>,
    #[serde(default)]
    enclosure: Vec<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    #[serde(rename = "@url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Option<AtomText>,
    #[serde(default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    #[serde(rename = "media:group")]
    media_group: Option<MediaGroup>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaGroup {
    #[serde(rename = "media:thumbnail", default)]
    thumbnail: Vec<MediaRef>,
    #[serde(rename = "media:description")]
    description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedFormat {
    Rss,
    Atom,
}

/// RSS 2.0 / Atom entries. Entries without a parsable date or a link are
/// dropped; keyword matching applies to title and summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedExtractor;

impl Extractor for FeedExtractor {
    fn extract(&self, raw: &RawContent, source: &Source) -> Result<Vec<Article>, ExtractError> {
        let xml = scrub_html_entities_for_xml(&raw.body);
        let candidates = match detect_format(&xml)? {
            FeedFormat::Rss => {
                let rss: Rss = from_str(&xml)
                    .map_err(|e| ExtractError::ParseFailure(format!("rss: {e}")))?;
                rss.channel.item.into_iter().map(from_rss_item).collect::<Vec<_>>()
            }
            FeedFormat::Atom => {
                let atom: AtomFeed = from_str(&xml)
                    .map_err(|e| ExtractError::ParseFailure(format!("atom: {e}")))?;
                atom.entry.into_iter().map(from_atom_entry).collect::<Vec<_>>()
            }
        };

        let mut out = Vec::with_capacity(candidates.len());
        let mut undated = 0usize;
        for c in candidates {
            let Some(published_at) = c.published_at else {
                undated += 1;
                continue;
            };
            let Some(link) = c.link.and_then(|l| resolve_url(&raw.url, &l)) else {
                continue;
            };
            let title = normalize_text(&c.title);
            if title.is_empty() {
                continue;
            }
            let summary = clean_summary(&c.summary_html, SUMMARY_CAP_FEED);
            if !source.matches_keywords(&[&title, &summary]) {
                continue;
            }
            let image_url = c
                .image
                .or_else(|| first_img_src(&c.summary_html))
                .and_then(|i| resolve_url(&raw.url, &i));
            out.push(Article {
                source_name: source.name.clone(),
                title,
                canonical_url: link,
                published_at,
                summary,
                image_url,
                fetched_at: raw.fetched_at,
            });
        }

        if undated > 0 {
            tracing::debug!(target: "extract", source = %source.name, undated, "dropped entries without a parsable date");
            counter!("digest_articles_dropped_total", "reason" => "undated").increment(undated as u64);
        }
        Ok(out)
    }
}

struct Candidate {
    title: String,
    link: Option<String>,
    published_at: Option<DateTime<Utc>>,
    summary_html: String,
    image: Option<String>,
}

fn from_rss_item(it: Item) -> Candidate {
    let image = it
        .media_thumbnail
        .into_iter()
        .find_map(|m| m.url)
        .or_else(|| it.media_content.into_iter().find_map(|m| m.url))
        .or_else(|| {
            it.enclosure
                .into_iter()
                .find(|e| e.mime.as_deref().is_some_and(|m| m.starts_with("image")))
                .and_then(|e| e.url)
        });
    let link = it
        .link
        .filter(|l| !l.trim().is_empty())
        .or_else(|| it.guid.filter(|g| g.starts_with("http")));
    Candidate {
        title: it.title.unwrap_or_default(),
        link,
        published_at: it
            .pub_date
            .as_deref()
            .or(it.dc_date.as_deref())
            .and_then(parse_feed_date),
        summary_html: it.description.unwrap_or_default(),
        image,
    }
}

fn from_atom_entry(e: Entry) -> Candidate {
    let link = e
        .link
        .iter()
        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
        .or_else(|| e.link.first())
        .and_then(|l| l.href.clone());
    let (image, media_desc) = match e.media_group {
        Some(g) => (g.thumbnail.into_iter().find_map(|t| t.url), g.description),
        None => (None, None),
    };
    let summary_html = e
        .summary
        .map(|t| t.value)
        .or_else(|| e.content.map(|t| t.value))
        .or(media_desc)
        .unwrap_or_default();
    Candidate {
        title: e.title.map(|t| t.value).unwrap_or_default(),
        link,
        published_at: e
            .published
            .as_deref()
            .or(e.updated.as_deref())
            .and_then(parse_feed_date),
        summary_html,
        image,
    }
}

fn detect_format(xml: &str) -> Result<FeedFormat, ExtractError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                return match name.as_ref() {
                    b"rss" => Ok(FeedFormat::Rss),
                    b"feed" => Ok(FeedFormat::Atom),
                    other => Err(ExtractError::UnsupportedFormat(format!(
                        "root element <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => {
                return Err(ExtractError::ParseFailure("empty document".into()));
            }
            Ok(_) => continue,
            Err(e) => return Err(ExtractError::ParseFailure(e.to_string())),
        }
    }
}

/// RFC 2822 (RSS) first, then RFC 3339 (Atom, dc:date).
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let parsed = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond()));
    parsed.or_else(|| {
        DateTime::parse_from_rfc2822(ts)
            .or_else(|_| DateTime::parse_from_rfc3339(ts))
            .ok()
            .map(|d| d.with_timezone(&Utc))
    })
}

/// HTML entities that are not predefined in XML and would abort the parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
