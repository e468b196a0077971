// src/ingest/filter.rs
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::cmp::Reverse;
use std::collections::HashSet;

use crate::ingest::types::{Article, Source};

/// Query parameters that only carry campaign/referrer tracking.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "yclid", "msclkid", "mc_cid", "mc_eid", "igshid", "si", "ref",
    "ref_src", "_hsenc", "_hsmi", "spm", "cmpid", "ocid",
];

fn is_tracking_param(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_") || TRACKING_PARAMS.contains(&k.as_str())
}

/// Normalize a URL so equivalent links compare equal: lowercase scheme/host,
/// default port and fragment removed, tracking parameters stripped, no
/// trailing slash.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut u) = url::Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    u.set_fragment(None);

    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = u.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        u.set_path(path.trim_end_matches('/'));
    }

    let mut s = u.to_string();
    if u.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Newest first; ties by source priority (declaration order), then title.
pub fn sort_articles(articles: &mut [Article], priority_of: impl Fn(&str) -> usize) {
    articles.sort_by(|a, b| {
        (Reverse(a.published_at), priority_of(&a.source_name), &a.title).cmp(&(
            Reverse(b.published_at),
            priority_of(&b.source_name),
            &b.title,
        ))
    });
}

/// Run-scoped filter state: canonical URLs already kept by earlier sources.
/// Sources must be filtered in declaration order so "first seen" is stable.
#[derive(Debug, Default)]
pub struct FilterAndDedup {
    kept_urls: HashSet<String>,
}

impl FilterAndDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recency window, canonicalization, dedup, ordering and cap for one source.
    pub fn filter(
        &mut self,
        articles: Vec<Article>,
        source: &Source,
        priority: usize,
        run_started_at: DateTime<Utc>,
    ) -> Vec<Article> {
        let cutoff = run_started_at - Duration::days(i64::from(source.max_age_days));
        let before = articles.len();

        let mut local_seen: HashSet<String> = HashSet::new();
        let mut out: Vec<Article> = Vec::with_capacity(articles.len());
        let (mut stale, mut dupes) = (0u64, 0u64);

        for mut a in articles {
            // Clock skew and the fetch-time fallback can stamp "the future".
            if a.published_at > run_started_at {
                a.published_at = run_started_at;
            }
            if a.published_at < cutoff {
                stale += 1;
                continue;
            }
            a.canonical_url = canonicalize_url(&a.canonical_url);
            if self.kept_urls.contains(&a.canonical_url)
                || !local_seen.insert(a.canonical_url.clone())
            {
                dupes += 1;
                continue;
            }
            out.push(a);
        }

        sort_articles(&mut out, |_| priority);
        out.truncate(source.max_articles);

        for a in &out {
            self.kept_urls.insert(a.canonical_url.clone());
        }

        counter!("digest_articles_dropped_total", "reason" => "stale").increment(stale);
        counter!("digest_articles_dropped_total", "reason" => "duplicate").increment(dupes);
        tracing::debug!(
            target: "filter",
            source = %source.name,
            before,
            kept = out.len(),
            stale,
            dupes,
            "filtered"
        );
        out
    }
}
