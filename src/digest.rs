// src/digest.rs
//! Digest composition and rendering (subject + plain text + HTML).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt::Write as _;

use crate::errors::ComposeError;
use crate::ingest::types::{Article, SourceOutcome};

pub const EMPTY_NOTICE: &str = "No new content this period";

#[derive(Debug, Clone, Serialize)]
pub struct DigestSection {
    pub source_name: String,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    /// Zone used for the date shown in the subject and header.
    #[serde(skip)]
    pub tz: Tz,
    pub sections: Vec<DigestSection>,
    pub total_articles: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub failed_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDigest {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Group articles by source (outcome order first, unknown sources after) and
/// count source results. Fails if the article list breaks URL uniqueness.
pub fn compose(
    title: &str,
    articles: &[Article],
    outcomes: &[(String, SourceOutcome)],
    generated_at: DateTime<Utc>,
) -> Result<Digest, ComposeError> {
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = articles.iter().find(|a| !seen.insert(a.canonical_url.as_str())) {
        return Err(ComposeError::Duplicate(dup.canonical_url.clone()));
    }

    let mut sections: Vec<DigestSection> = outcomes
        .iter()
        .map(|(name, _)| DigestSection {
            source_name: name.clone(),
            articles: Vec::new(),
        })
        .collect();
    for a in articles {
        match sections.iter_mut().find(|s| s.source_name == a.source_name) {
            Some(s) => s.articles.push(a.clone()),
            None => sections.push(DigestSection {
                source_name: a.source_name.clone(),
                articles: vec![a.clone()],
            }),
        }
    }
    sections.retain(|s| !s.articles.is_empty());

    let failed_sources: Vec<String> = outcomes
        .iter()
        .filter(|(_, o)| o.is_failure())
        .map(|(n, _)| n.clone())
        .collect();

    let digest = Digest {
        title: title.to_string(),
        generated_at,
        tz: Tz::UTC,
        total_articles: articles.len(),
        sources_ok: outcomes.len() - failed_sources.len(),
        sources_failed: failed_sources.len(),
        failed_sources,
        sections,
    };
    tracing::info!(
        target: "digest",
        articles = digest.total_articles,
        sections = digest.sections.len(),
        sources_failed = digest.sources_failed,
        "digest composed"
    );
    Ok(digest)
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.total_articles == 0
    }

    pub fn in_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    fn date_label(&self) -> String {
        self.generated_at
            .with_timezone(&self.tz)
            .format("%B %d, %Y")
            .to_string()
    }

    pub fn subject(&self) -> String {
        format!(
            "{} - {} ({} updates)",
            self.title,
            self.date_label(),
            self.total_articles
        )
    }

    fn stats_line(&self) -> String {
        let mut s = format!(
            "Sources: {} succeeded, {} failed",
            self.sources_ok, self.sources_failed
        );
        if !self.failed_sources.is_empty() {
            s.push_str(&format!(" ({})", self.failed_sources.join(", ")));
        }
        s
    }

    pub fn render(&self) -> Result<RenderedDigest, ComposeError> {
        Ok(RenderedDigest {
            subject: self.subject(),
            text: self.render_text()?,
            html: self.render_html()?,
        })
    }

    pub fn render_text(&self) -> Result<String, ComposeError> {
        let mut out = String::new();
        writeln!(out, "{} - {}", self.title, self.date_label())?;
        writeln!(out)?;
        if self.is_empty() {
            writeln!(out, "{EMPTY_NOTICE}.")?;
        } else {
            writeln!(out, "Found {} articles:", self.total_articles)?;
            for section in &self.sections {
                writeln!(out)?;
                writeln!(out, "== {} ==", section.source_name)?;
                for a in &section.articles {
                    writeln!(out)?;
                    writeln!(out, "Title: {}", a.title)?;
                    writeln!(out, "URL: {}", a.canonical_url)?;
                    writeln!(out, "Date: {}", a.published_at.format("%Y-%m-%d %H:%M UTC"))?;
                    if !a.summary.is_empty() {
                        writeln!(out, "Summary: {}", a.summary)?;
                    }
                }
            }
        }
        writeln!(out)?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "{}", self.stats_line())?;
        Ok(out)
    }

    pub fn render_html(&self) -> Result<String, ComposeError> {
        use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

        let mut out = String::new();
        write!(
            out,
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head>\
             <body style=\"font-family:Arial,sans-serif;max-width:800px;margin:0 auto;color:#333\">"
        )?;
        write!(
            out,
            "<h1>{}</h1><div class=\"date\">{}</div>",
            text(&self.title),
            text(&self.date_label())
        )?;

        if self.is_empty() {
            write!(out, "<div class=\"no-articles\"><p>{EMPTY_NOTICE}.</p></div>")?;
        } else {
            write!(
                out,
                "<div class=\"count\">{} new article{} found</div>",
                self.total_articles,
                if self.total_articles == 1 { "" } else { "s" }
            )?;
            for section in &self.sections {
                write!(out, "<h2>{}</h2>", text(&section.source_name))?;
                for a in &section.articles {
                    write!(out, "<div class=\"article\">")?;
                    if let Some(img) = &a.image_url {
                        write!(
                            out,
                            "<img src=\"{}\" alt=\"\" style=\"max-width:160px;float:right\">",
                            attr(img)
                        )?;
                    }
                    write!(
                        out,
                        "<div class=\"article-title\"><a href=\"{}\">{}</a></div>\
                         <div class=\"article-date\">{}</div>",
                        attr(&a.canonical_url),
                        text(&a.title),
                        a.published_at.format("%Y-%m-%d %H:%M UTC")
                    )?;
                    if !a.summary.is_empty() {
                        write!(out, "<div class=\"article-summary\">{}</div>", text(&a.summary))?;
                    }
                    write!(out, "</div>")?;
                }
            }
        }

        write!(
            out,
            "<div class=\"footer\"><p>{}</p></div></body></html>",
            text(&self.stats_line())
        )?;
        Ok(out)
    }
}
