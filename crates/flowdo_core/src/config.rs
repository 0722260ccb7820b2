//! Process configuration.
//!
//! # Responsibility
//! - Read FlowDo settings from the environment once, at process start.
//! - Hand an explicit, read-only config object to triggers and storage.
//!
//! # Invariants
//! - The flow-up engine never reads configuration.
//! - An empty cron secret disables on-demand runs.

use crate::logging::default_log_level;
use chrono::NaiveTime;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "FLOWDO_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "FLOWDO_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "FLOWDO_LOG_DIR";
pub const ENV_CRON_SECRET: &str = "FLOWDO_CRON_SECRET";
pub const ENV_SCHEDULE_UTC: &str = "FLOWDO_SCHEDULE_UTC";

const SCHEDULE_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required setting {key}"),
            Self::Invalid { key, message } => write!(f, "invalid setting {key}: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Read-only process settings.
#[derive(Clone, PartialEq, Eq)]
pub struct FlowDoConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling logs. `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
    /// Shared secret for on-demand flow-up runs.
    pub cron_secret: String,
    /// Wall-clock UTC time of the daily scheduled run.
    pub schedule_utc: NaiveTime,
}

// Hand-written so the secret never ends up in logs.
impl std::fmt::Debug for FlowDoConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDoConfig")
            .field("db_path", &self.db_path)
            .field("log_level", &self.log_level)
            .field("log_dir", &self.log_dir)
            .field("cron_secret", &if self.cron_secret.is_empty() { "" } else { "***" })
            .field("schedule_utc", &self.schedule_utc)
            .finish()
    }
}

impl FlowDoConfig {
    /// Settings with defaults for everything except the database path.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            log_level: default_log_level().to_string(),
            log_dir: None,
            cron_secret: String::new(),
            schedule_utc: NaiveTime::MIN,
        }
    }

    /// Loads settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    /// - `Missing` when `FLOWDO_DB_PATH` is unset or blank.
    /// - `Invalid` when the log dir is relative or the schedule is not `HH:MM`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let db_path = read(ENV_DB_PATH).ok_or(ConfigError::Missing(ENV_DB_PATH))?;
        let mut config = Self::new(db_path);

        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = level;
        }

        if let Some(dir) = read(ENV_LOG_DIR) {
            let dir = PathBuf::from(dir);
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid {
                    key: ENV_LOG_DIR,
                    message: format!("must be an absolute path, got `{}`", dir.display()),
                });
            }
            config.log_dir = Some(dir);
        }

        if let Some(secret) = lookup(ENV_CRON_SECRET) {
            config.cron_secret = secret;
        }

        if let Some(schedule) = read(ENV_SCHEDULE_UTC) {
            config.schedule_utc = parse_schedule(&schedule)?;
        }

        Ok(config)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn on_demand_enabled(&self) -> bool {
        !self.cron_secret.is_empty()
    }
}

fn parse_schedule(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, SCHEDULE_FORMAT).map_err(|err| ConfigError::Invalid {
        key: ENV_SCHEDULE_UTC,
        message: format!("expected HH:MM, got `{value}` ({err})"),
    })
}
