// src/config/mod.rs
//! Process configuration, read once at startup from the environment.

pub mod schedule;

use lettre::message::Mailbox;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::errors::{ConfigError, ConfigResult};
use crate::ingest::fetcher::FetchPolicy;
pub use schedule::ScheduleSpec;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

/// Every variable the process reads. Diagnostics report presence only.
pub const KNOWN_ENV_VARS: &[&str] = &[
    "DIGEST_SOURCES_PATH",
    "DIGEST_TITLE",
    "SCHEDULE_TIME",
    "SCHEDULE_TIMEZONE",
    "SCHEDULE_WEEKDAY",
    "RUN_ON_STARTUP",
    "SENDER_EMAIL",
    "RECIPIENT_EMAIL",
    "SMTP_SERVER",
    "SMTP_PORT",
    "SENDER_PASSWORD",
    "GMAIL_CREDENTIALS_JSON",
    "GMAIL_TOKEN_JSON",
    "GMAIL_API_BASE",
    "FETCH_MAX_RETRIES",
    "FETCH_RETRY_DELAY_SECS",
    "FETCH_TIMEOUT_SECS",
    "RATE_LIMIT_MIN_MS",
    "RATE_LIMIT_MAX_MS",
    "FETCH_CONCURRENCY",
    "USER_AGENT",
    "MANUAL_TRIGGER_TIMEOUT_SECS",
    "LOG_BUFFER_CAPACITY",
    "RUN_HISTORY_CAPACITY",
    "LOG_FORMAT",
    "PORT",
];

pub fn env_presence() -> BTreeMap<&'static str, bool> {
    KNOWN_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(k).map(|v| !v.trim().is_empty()).unwrap_or(false)))
        .collect()
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env_nonempty(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(target: "config", var = key, value = %raw, "unparsable value, using default");
            default
        }),
    }
}

fn env_flag(key: &str) -> bool {
    env_nonempty(key).is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Settings the management surface needs even when the rest of the
/// configuration is broken.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub log_capacity: usize,
    pub history_capacity: usize,
}

impl ServerSettings {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 8080),
            log_capacity: env_or("LOG_BUFFER_CAPACITY", 500usize).max(1),
            history_capacity: env_or("RUN_HISTORY_CAPACITY", 50usize).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub token_uri: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub sender: String,
    pub recipients: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub oauth: Option<OAuthConfig>,
}

impl DeliveryConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let sender = env_nonempty("SENDER_EMAIL")
            .ok_or_else(|| ConfigError::MissingCredential("SENDER_EMAIL".into()))?;
        check_address("SENDER_EMAIL", &sender)?;
        let recipients = parse_recipients(&env_nonempty("RECIPIENT_EMAIL").unwrap_or_default());
        if recipients.is_empty() {
            return Err(ConfigError::MissingCredential("RECIPIENT_EMAIL".into()));
        }
        for r in &recipients {
            check_address("RECIPIENT_EMAIL", r)?;
        }

        let smtp = env_nonempty("SENDER_PASSWORD").map(|password| SmtpConfig {
            host: env_nonempty("SMTP_SERVER").unwrap_or_else(|| "smtp.gmail.com".into()),
            port: env_or("SMTP_PORT", 587),
            username: sender.clone(),
            password,
        });

        let oauth = match (
            env_nonempty("GMAIL_CREDENTIALS_JSON"),
            env_nonempty("GMAIL_TOKEN_JSON"),
        ) {
            (Some(creds), Some(token)) => Some(parse_oauth(
                &creds,
                &token,
                env_nonempty("GMAIL_API_BASE").unwrap_or_else(|| DEFAULT_GMAIL_API_BASE.into()),
            )?),
            _ => None,
        };

        if smtp.is_none() && oauth.is_none() {
            return Err(ConfigError::MissingCredential(
                "either SENDER_PASSWORD (SMTP) or GMAIL_CREDENTIALS_JSON + GMAIL_TOKEN_JSON (OAuth)"
                    .into(),
            ));
        }

        Ok(Self {
            sender,
            recipients,
            smtp,
            oauth,
        })
    }
}

pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Addresses are validated once here so a typo disarms the scheduler
/// instead of surfacing mid-run.
fn check_address(key: &str, addr: &str) -> ConfigResult<()> {
    addr.parse::<Mailbox>()
        .map(|_| ())
        .map_err(|e| ConfigError::Parse(format!("{key}: {addr:?} is not a valid address ({e})")))
}

#[derive(Debug, Default, Deserialize)]
struct ClientSecrets {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CredentialsJson {
    Installed { installed: ClientSecrets },
    Web { web: ClientSecrets },
    Flat(ClientSecrets),
}

#[derive(Debug, Deserialize)]
struct TokenJson {
    token: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Parse the OAuth client + token JSON blobs (Google's download format,
/// either flat or nested under `installed`/`web`).
pub fn parse_oauth(creds: &str, token: &str, api_base: String) -> ConfigResult<OAuthConfig> {
    let creds: CredentialsJson = serde_json::from_str(creds)
        .map_err(|e| ConfigError::Parse(format!("GMAIL_CREDENTIALS_JSON: {e}")))?;
    let creds = match creds {
        CredentialsJson::Installed { installed } => installed,
        CredentialsJson::Web { web } => web,
        CredentialsJson::Flat(c) => c,
    };
    let token: TokenJson = serde_json::from_str(token)
        .map_err(|e| ConfigError::Parse(format!("GMAIL_TOKEN_JSON: {e}")))?;

    let missing = |what: &str| ConfigError::MissingCredential(format!("OAuth {what}"));
    Ok(OAuthConfig {
        client_id: creds
            .client_id
            .or(token.client_id)
            .ok_or_else(|| missing("client_id"))?,
        client_secret: creds
            .client_secret
            .or(token.client_secret)
            .ok_or_else(|| missing("client_secret"))?,
        refresh_token: token.refresh_token.ok_or_else(|| missing("refresh_token"))?,
        access_token: token.token,
        token_uri: creds
            .token_uri
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        api_base,
    })
}

/// Everything the scheduler and pipeline need. Failure here keeps the
/// scheduler disarmed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub schedule: ScheduleSpec,
    pub run_on_startup: bool,
    pub fetch: FetchPolicy,
    pub delivery: DeliveryConfig,
    pub manual_trigger_timeout: Duration,
    pub digest_title: String,
}

impl Settings {
    pub fn from_env() -> ConfigResult<Self> {
        let schedule = ScheduleSpec::parse(
            &env_nonempty("SCHEDULE_TIME").unwrap_or_else(|| "07:00".into()),
            &env_nonempty("SCHEDULE_TIMEZONE").unwrap_or_else(|| "UTC".into()),
            env_nonempty("SCHEDULE_WEEKDAY").as_deref(),
        )?;

        let defaults = FetchPolicy::default();
        let min_delay = Duration::from_millis(env_or(
            "RATE_LIMIT_MIN_MS",
            defaults.min_delay.as_millis() as u64,
        ));
        let max_delay = Duration::from_millis(env_or(
            "RATE_LIMIT_MAX_MS",
            defaults.max_delay.as_millis() as u64,
        ))
        .max(min_delay);
        let fetch = FetchPolicy {
            max_retries: env_or("FETCH_MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_secs(env_or(
                "FETCH_RETRY_DELAY_SECS",
                defaults.retry_delay.as_secs(),
            )),
            timeout: Duration::from_secs(env_or("FETCH_TIMEOUT_SECS", defaults.timeout.as_secs())),
            min_delay,
            max_delay,
            concurrency: env_or("FETCH_CONCURRENCY", defaults.concurrency).max(1),
            user_agent: env_nonempty("USER_AGENT").unwrap_or(defaults.user_agent),
        };

        Ok(Self {
            schedule,
            run_on_startup: env_flag("RUN_ON_STARTUP"),
            fetch,
            delivery: DeliveryConfig::from_env()?,
            manual_trigger_timeout: Duration::from_secs(env_or("MANUAL_TRIGGER_TIMEOUT_SECS", 120)),
            digest_title: env_nonempty("DIGEST_TITLE").unwrap_or_else(|| "News Digest".into()),
        })
    }
}
