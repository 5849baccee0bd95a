//! Configuration loaded from `OUTREACH_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::gate::PhaseSchedule;
use crate::pipeline::persona::{DEFAULT_DENY_PHRASES, PersonaPolicy};
use crate::pipeline::routing::RoutingPolicy;
use crate::pipeline::scoring::ScoringPolicy;
use crate::providers::openrouter::DEFAULT_MODEL;

/// Per-run external call caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub batch_size: usize,
    pub max_sends: usize,
    pub max_provider_calls: usize,
    pub max_persona_calls: usize,
    pub provider_timeout: Duration,
    pub provider_concurrency: usize,
    /// Provider email reveals allowed per calendar month (UTC).
    pub monthly_email_reveals: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_sends: 25,
            max_provider_calls: 50,
            max_persona_calls: 50,
            provider_timeout: Duration::from_secs(20),
            provider_concurrency: 4,
            monthly_email_reveals: 50,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug)]
pub struct PipelineConfig {
    pub event_date: DateTime<Utc>,
    pub hard_stop_days: i64,
    pub min_channel_gap_hours: i64,
    pub db_path: PathBuf,
    pub limits: RunLimits,
    pub persona: PersonaPolicy,
    pub scoring_policy_path: Option<PathBuf>,
    pub routing_policy_path: Option<PathBuf>,
    pub import_path: Option<PathBuf>,
    pub dry_run: bool,
    pub log_dir: Option<PathBuf>,
    pub apollo_api_key: Option<SecretString>,
    pub openrouter_api_key: Option<SecretString>,
    pub persona_model: String,
    pub linkedin_webhook: Option<String>,
    pub email_webhook: Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let event_raw =
            get("OUTREACH_EVENT_DATE").ok_or_else(|| ConfigError::MissingEnvVar("OUTREACH_EVENT_DATE".into()))?;
        let event_date = parse_event_date(&event_raw)?;

        let defaults = RunLimits::default();
        let limits = RunLimits {
            batch_size: positive(&get, "OUTREACH_BATCH_SIZE", defaults.batch_size)?,
            max_sends: parse_or(&get, "OUTREACH_MAX_SENDS_PER_RUN", defaults.max_sends)?,
            max_provider_calls: parse_or(&get, "OUTREACH_MAX_PROVIDER_CALLS", defaults.max_provider_calls)?,
            max_persona_calls: parse_or(&get, "OUTREACH_MAX_PERSONA_CALLS", defaults.max_persona_calls)?,
            provider_timeout: Duration::from_secs(positive(
                &get,
                "OUTREACH_PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )?),
            provider_concurrency: positive(&get, "OUTREACH_PROVIDER_CONCURRENCY", defaults.provider_concurrency)?,
            monthly_email_reveals: parse_or(
                &get,
                "OUTREACH_MONTHLY_EMAIL_REVEALS",
                defaults.monthly_email_reveals,
            )?,
        };

        let deny_phrases = match get("OUTREACH_DENY_PHRASES") {
            Some(list) => list
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            None => DEFAULT_DENY_PHRASES.iter().map(|s| s.to_string()).collect(),
        };
        let persona = PersonaPolicy {
            deny_phrases,
            min_words: parse_or(&get, "OUTREACH_MIN_WORDS", 10)?,
            min_theme_words: parse_or(&get, "OUTREACH_MIN_THEME_WORDS", 3)?,
        };

        let hard_stop_days: i64 = positive(&get, "OUTREACH_HARD_STOP_DAYS", 21)?;
        let min_channel_gap_hours: i64 = parse_or(&get, "OUTREACH_MIN_CHANNEL_GAP_HOURS", 48)?;
        if min_channel_gap_hours < 0 {
            return Err(ConfigError::InvalidValue {
                key: "OUTREACH_MIN_CHANNEL_GAP_HOURS".into(),
                message: "must not be negative".into(),
            });
        }
        days("OUTREACH_HARD_STOP_DAYS", hard_stop_days)?;
        hours("OUTREACH_MIN_CHANNEL_GAP_HOURS", min_channel_gap_hours)?;

        Ok(Self {
            event_date,
            hard_stop_days,
            min_channel_gap_hours,
            db_path: get("OUTREACH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/outreach.db")),
            limits,
            persona,
            scoring_policy_path: get("OUTREACH_SCORING_POLICY").map(PathBuf::from),
            routing_policy_path: get("OUTREACH_ROUTING_POLICY").map(PathBuf::from),
            import_path: get("OUTREACH_IMPORT_PATH").map(PathBuf::from),
            dry_run: parse_bool(&get, "OUTREACH_DRY_RUN")?,
            log_dir: get("OUTREACH_LOG_DIR").map(PathBuf::from),
            apollo_api_key: get("APOLLO_API_KEY").map(SecretString::from),
            openrouter_api_key: get("OPENROUTER_API_KEY").map(SecretString::from),
            persona_model: get("OUTREACH_PERSONA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            linkedin_webhook: get("OUTREACH_LINKEDIN_WEBHOOK"),
            email_webhook: get("OUTREACH_EMAIL_WEBHOOK"),
        })
    }

    pub fn schedule(&self) -> Result<PhaseSchedule, ConfigError> {
        let hard_stop = days("OUTREACH_HARD_STOP_DAYS", self.hard_stop_days)?;
        let gap = hours("OUTREACH_MIN_CHANNEL_GAP_HOURS", self.min_channel_gap_hours)?;
        if self.event_date.checked_add_signed(hard_stop).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "OUTREACH_HARD_STOP_DAYS".into(),
                message: "hard stop falls outside the supported date range".into(),
            });
        }
        Ok(PhaseSchedule::new(self.event_date)
            .with_hard_stop(hard_stop)
            .with_min_channel_gap(gap))
    }

    pub fn scoring_policy(&self) -> Result<ScoringPolicy, ConfigError> {
        match &self.scoring_policy_path {
            Some(path) => ScoringPolicy::from_json_file(path),
            None => Ok(ScoringPolicy::default()),
        }
    }

    pub fn routing_policy(&self) -> Result<RoutingPolicy, ConfigError> {
        match &self.routing_policy_path {
            Some(path) => RoutingPolicy::from_json_file(path),
            None => Ok(RoutingPolicy::default()),
        }
    }
}

fn days(key: &str, value: i64) -> Result<TimeDelta, ConfigError> {
    TimeDelta::try_days(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.into(),
        message: format!("{value} days is out of range"),
    })
}

fn hours(key: &str, value: i64) -> Result<TimeDelta, ConfigError> {
    TimeDelta::try_hours(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.into(),
        message: format!("{value} hours is out of range"),
    })
}

/// `YYYY-MM-DD` (midnight UTC) or RFC 3339.
fn parse_event_date(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "OUTREACH_EVENT_DATE".into(),
            message: format!("expected YYYY-MM-DD or RFC 3339, got {raw:?}"),
        })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}
