//! # Configuration Module
//!
//! Environment-driven configuration for the bot: transport credentials, the
//! gated document, operator settings, the lead store backend and the daily
//! report schedule.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::errors::ConfigError;

// Defaults
pub const DEFAULT_GUIDE_NAME: &str = "guide";
pub const DEFAULT_KEYWORDS: &str = "гайд";
pub const DEFAULT_LANGUAGE: &str = "ru";
pub const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 600;
pub const DEFAULT_PACING_MS: u64 = 2000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_REPORT_TIME: &str = "21:00";
pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";
pub const DEFAULT_RECORD_STORE_URL: &str = "https://api.airtable.com/v0";

/// The gated document and where to get it from
#[derive(Debug, Clone, PartialEq)]
pub struct GuideConfig {
    pub name: String,
    /// Pre-uploaded file reference, tried first
    pub file_id: Option<String>,
    /// Local file used when the reference is absent or rejected
    pub path: Option<PathBuf>,
}

/// Hosted record-store connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStoreConfig {
    pub api_url: String,
    pub token: String,
    pub base_id: String,
    pub leads_table: String,
    pub reports_table: String,
    pub referrals_table: String,
    pub catalog_table: String,
    /// Scratch table for operator write checks
    pub diagnostics_table: String,
}

/// Which lead store backend to use
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Postgres { database_url: String },
    RecordStore(RecordStoreConfig),
    /// No store configured; leads only live for the lifetime of the process
    Memory,
}

/// Daily report schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSchedule {
    pub at: NaiveTime,
    pub timezone: Tz,
}

/// Operator alert settings
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    /// Where alerts and daily reports go
    pub chat_id: Option<i64>,
    /// Minimum time between two alerts
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            chat_id: None,
            cooldown: Duration::from_secs(DEFAULT_ALERT_COOLDOWN_SECS),
        }
    }
}

/// Complete bot configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    /// Bot handle without the leading `@`
    pub bot_username: String,
    /// Gating channel, either `@name` or a numeric id
    pub channel_id: String,
    /// Public link used by the subscribe button
    pub channel_url: Option<String>,
    pub guide: GuideConfig,
    /// Lower-cased free-text activation keywords
    pub keywords: Vec<String>,
    pub admin_user_id: Option<i64>,
    pub alerts: AlertConfig,
    /// Pause between confirmation, document and follow-up prompt
    pub pacing: Duration,
    pub session_ttl: Duration,
    pub default_language: String,
    pub report: ReportSchedule,
    pub store: StoreConfig,
}

impl BotConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let bot_token = require("BOT_TOKEN")?;
        let bot_username = require("BOT_USERNAME")?.trim_start_matches('@').to_string();
        let channel_id = require("CHANNEL_ID")?;

        let channel_url = get("CHANNEL_URL").or_else(|| {
            channel_id
                .strip_prefix('@')
                .map(|name| format!("https://t.me/{name}"))
        });

        let guide = GuideConfig {
            name: get("GUIDE_NAME").unwrap_or_else(|| DEFAULT_GUIDE_NAME.to_string()),
            file_id: get("GUIDE_FILE_ID"),
            path: get("GUIDE_PATH").map(PathBuf::from),
        };
        if guide.file_id.is_none() && guide.path.is_none() {
            return Err(ConfigError::Missing("GUIDE_FILE_ID or GUIDE_PATH"));
        }

        let keywords = parse_keywords(
            &get("FUNNEL_KEYWORDS").unwrap_or_else(|| DEFAULT_KEYWORDS.to_string()),
        );

        let admin_user_id = get("ADMIN_USER_ID")
            .map(|value| parse_number::<i64>("ADMIN_USER_ID", &value))
            .transpose()?
            .filter(|id| *id != 0);

        let alert_chat = get("ALERT_CHAT_ID")
            .map(|value| parse_number::<i64>("ALERT_CHAT_ID", &value))
            .transpose()?;
        let alerts = AlertConfig {
            chat_id: alert_chat.or(admin_user_id),
            cooldown: Duration::from_secs(parse_or(
                &get,
                "ALERT_COOLDOWN_SECS",
                DEFAULT_ALERT_COOLDOWN_SECS,
            )?),
        };

        let pacing = Duration::from_millis(parse_or(&get, "PACING_MS", DEFAULT_PACING_MS)?);
        let session_ttl =
            Duration::from_secs(parse_or(&get, "SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?);

        let default_language =
            get("BOT_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let report = ReportSchedule {
            at: parse_report_time(
                &get("REPORT_TIME").unwrap_or_else(|| DEFAULT_REPORT_TIME.to_string()),
            )?,
            timezone: parse_timezone(
                &get("TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            )?,
        };

        let store = if let Some(database_url) = get("DATABASE_URL") {
            StoreConfig::Postgres { database_url }
        } else if let (Some(token), Some(base_id)) =
            (get("RECORD_STORE_TOKEN"), get("RECORD_STORE_BASE"))
        {
            StoreConfig::RecordStore(RecordStoreConfig {
                api_url: get("RECORD_STORE_URL")
                    .unwrap_or_else(|| DEFAULT_RECORD_STORE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                token,
                base_id,
                leads_table: get("LEADS_TABLE").unwrap_or_else(|| "Leads".to_string()),
                reports_table: get("REPORTS_TABLE").unwrap_or_else(|| "Reports".to_string()),
                referrals_table: get("REFERRALS_TABLE")
                    .unwrap_or_else(|| "Referrals".to_string()),
                catalog_table: get("CATALOG_TABLE").unwrap_or_else(|| "Catalog".to_string()),
                diagnostics_table: get("DIAGNOSTICS_TABLE")
                    .unwrap_or_else(|| "Diagnostics".to_string()),
            })
        } else {
            StoreConfig::Memory
        };

        Ok(Self {
            bot_token,
            bot_username,
            channel_id,
            channel_url,
            guide,
            keywords,
            admin_user_id,
            alerts,
            pacing,
            session_ttl,
            default_language,
            report,
            store,
        })
    }

    /// Whether the given user may run operator commands
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_id == Some(user_id)
    }
}

/// Split a comma-separated keyword list, lower-casing and dropping blanks
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

/// Parse an `HH:MM` report time
pub fn parse_report_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ConfigError::Invalid {
        key: "REPORT_TIME",
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an IANA time zone name
pub fn parse_timezone(raw: &str) -> Result<Tz, ConfigError> {
    raw.trim().parse::<Tz>().map_err(|e| ConfigError::Invalid {
        key: "TIMEZONE",
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<G>(get: &G, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_number(key, &value),
        None => Ok(default),
    }
}
