//! Flow-up trigger helpers.
//!
//! # Responsibility
//! - Gate on-demand runs behind the shared cron secret.
//! - Compute when the daily scheduled run fires next.
//!
//! # Invariants
//! - Authorization is decided before the engine is invoked.
//! - An empty configured secret rejects every on-demand call.
//! - Scheduled runs move strictly forward, even if the wall clock steps back.

use crate::config::FlowDoConfig;
use chrono::{DateTime, Days, NaiveTime, Utc};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Entry point that started a flow-up run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Scheduled,
    OnDemand,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::OnDemand => "on_demand",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerError {
    /// No cron secret is configured.
    Disabled,
    /// Secret missing or wrong.
    Forbidden,
}

impl Display for TriggerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "on-demand flow-up is disabled"),
            Self::Forbidden => write!(f, "forbidden"),
        }
    }
}

impl Error for TriggerError {}

/// Checks the secret presented by an on-demand caller.
pub fn authorize_on_demand(
    config: &FlowDoConfig,
    provided: Option<&str>,
) -> Result<(), TriggerError> {
    if !config.on_demand_enabled() {
        warn!("event=flow_up_trigger module=trigger status=rejected reason=disabled");
        return Err(TriggerError::Disabled);
    }

    match provided {
        Some(secret) if secrets_match(secret.as_bytes(), config.cron_secret.as_bytes()) => Ok(()),
        Some(_) => {
            warn!("event=flow_up_trigger module=trigger status=rejected reason=bad_secret");
            Err(TriggerError::Forbidden)
        }
        None => {
            warn!("event=flow_up_trigger module=trigger status=rejected reason=missing_secret");
            Err(TriggerError::Forbidden)
        }
    }
}

// Compares every byte so timing does not reveal the matching prefix.
fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (left, right)| acc | (left ^ right))
        == 0
}

/// Next instant strictly after `after` whose UTC wall clock reads `at`.
pub fn next_scheduled_run(after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = after.date_naive().and_time(at).and_utc();
    if today > after {
        return today;
    }
    // Only fails past the end of chrono's calendar.
    match after.date_naive().checked_add_days(Days::new(1)) {
        Some(tomorrow) => tomorrow.and_time(at).and_utc(),
        None => DateTime::<Utc>::MAX_UTC,
    }
}

/// Next daily run after the one that fired at `previous`.
///
/// A wall clock stepped back behind `previous` cannot bring the same
/// instant around again; `None` means nothing has fired yet.
pub fn next_run_after(
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    at: NaiveTime,
) -> DateTime<Utc> {
    let after = previous.map_or(now, |previous| previous.max(now));
    next_scheduled_run(after, at)
}
