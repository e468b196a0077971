// src/ingest/providers/mod.rs
pub mod feed;
pub mod html;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::errors::ExtractError;
use crate::ingest::types::{Article, RawContent, Source, SourceKind};

pub use feed::FeedExtractor;
pub use html::HtmlExtractor;

/// Turns fetched content into candidate articles for one source.
pub trait Extractor: Send + Sync {
    fn extract(&self, raw: &RawContent, source: &Source) -> Result<Vec<Article>, ExtractError>;
}

static FEED: FeedExtractor = FeedExtractor;
static HTML: HtmlExtractor = HtmlExtractor;

pub fn extractor_for(kind: SourceKind) -> &'static dyn Extractor {
    match kind {
        SourceKind::Feed => &FEED,
        SourceKind::Html => &HTML,
    }
}

/// Resolve `href` against `base`; only http(s) results are kept.
pub(crate) fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let joined = match url::Url::parse(href) {
        Ok(u) => u,
        Err(_) => url::Url::parse(base).ok()?.join(href).ok()?,
    };
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

pub(crate) fn first_img_src(html: &str) -> Option<String> {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).expect("static img regex")
    });
    re.captures(html).map(|c| c[1].to_string())
}
