// src/ingest/config.rs
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{ConfigError, ConfigResult};
use crate::ingest::types::{Source, SourceKind};

pub const ENV_SOURCES_PATH: &str = "DIGEST_SOURCES_PATH";

const DEFAULT_MAX_AGE_DAYS: u32 = 1;
const DEFAULT_MAX_ARTICLES: usize = 10;

/// Ordered, read-only list of configured sources. Declaration order is the
/// source priority used for tie-breaking.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Source>) -> ConfigResult<Self> {
        validate(&sources)?;
        Ok(Self { sources })
    }

    pub fn all(&self) -> &[Source] {
        &self.sources
    }

    /// Enabled sources paired with their priority (declaration index).
    pub fn enabled(&self) -> impl Iterator<Item = (usize, &Source)> {
        self.sources.iter().enumerate().filter(|(_, s)| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::new(parse_sources(&content, ext.as_str())?)
    }

    /// Load using env var + fallbacks:
    /// 1) $DIGEST_SOURCES_PATH
    /// 2) config/sources.toml
    /// 3) config/sources.json
    pub fn load_default() -> ConfigResult<Self> {
        if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(ConfigError::InvalidSource(format!(
                "{ENV_SOURCES_PATH} points to non-existent path {}",
                pb.display()
            )));
        }
        for candidate in ["config/sources.toml", "config/sources.json"] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        Err(ConfigError::InvalidSource(
            "no sources file found (config/sources.toml or config/sources.json)".into(),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Defaults {
    max_age_days: Option<u32>,
    max_articles: Option<usize>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: String,
    url: String,
    #[serde(rename = "type")]
    kind: SourceKind,
    keywords: Option<Vec<String>>,
    max_age_days: Option<u32>,
    max_articles: Option<usize>,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    defaults: Defaults,
    sources: Vec<RawSource>,
}

fn parse_sources(s: &str, hint_ext: &str) -> ConfigResult<Vec<Source>> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    let mut last_err = String::from("unsupported sources format");
    if try_toml {
        match toml::from_str::<SourcesFile>(s) {
            Ok(v) => return Ok(resolve(v)),
            Err(e) => last_err = e.to_string(),
        }
    }
    match serde_json::from_str::<SourcesFile>(s) {
        Ok(v) => return Ok(resolve(v)),
        Err(e) if !try_toml => last_err = e.to_string(),
        Err(_) => {}
    }
    // Fallback: also try TOML if not attempted
    if !try_toml {
        if let Ok(v) = toml::from_str::<SourcesFile>(s) {
            return Ok(resolve(v));
        }
    }
    Err(ConfigError::Parse(last_err))
}

fn resolve(file: SourcesFile) -> Vec<Source> {
    let d = file.defaults;
    file.sources
        .into_iter()
        .map(|r| Source {
            name: r.name.trim().to_string(),
            url: r.url.trim().to_string(),
            kind: r.kind,
            keywords: clean_list(r.keywords.unwrap_or_else(|| d.keywords.clone())),
            max_age_days: r
                .max_age_days
                .or(d.max_age_days)
                .unwrap_or(DEFAULT_MAX_AGE_DAYS),
            max_articles: r
                .max_articles
                .or(d.max_articles)
                .unwrap_or(DEFAULT_MAX_ARTICLES),
            enabled: r.enabled,
        })
        .collect()
}

fn validate(sources: &[Source]) -> ConfigResult<()> {
    let mut seen = std::collections::HashSet::new();
    for s in sources {
        if s.name.is_empty() {
            return Err(ConfigError::InvalidSource("source with empty name".into()));
        }
        if !seen.insert(s.name.to_lowercase()) {
            return Err(ConfigError::InvalidSource(format!(
                "duplicate source name '{}'",
                s.name
            )));
        }
        match url::Url::parse(&s.url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
            _ => {
                return Err(ConfigError::InvalidSource(format!(
                    "source '{}' has invalid url '{}'",
                    s.name, s.url
                )))
            }
        }
        if s.max_articles == 0 {
            return Err(ConfigError::InvalidSource(format!(
                "source '{}' must allow at least one article",
                s.name
            )));
        }
    }
    Ok(())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}
