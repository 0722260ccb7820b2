//! Do domain model.
//!
//! # Responsibility
//! - Define the canonical task record tracked at a time-scale bucket.
//! - Define the closed bucket (`TimeUnit`) and kind (`DoType`) enums.
//!
//! # Invariants
//! - `id` is stable and never reused for another do.
//! - `TimeUnit` ordering follows the escalation ladder.
//! - Unknown bucket/kind strings are rejected, never defaulted.
//! - `completed_at` is only set while `completed` is true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a do.
pub type DoId = Uuid;

/// Identifier of the owning principal.
pub type UserId = Uuid;

/// Time-scale bucket a do currently lives in.
///
/// Variant order is the escalation order, so `Ord` can be used to check
/// that a bucket never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Today,
    Week,
    Month,
    Season,
    Year,
    MultiYear,
}

impl TimeUnit {
    /// All buckets in escalation order.
    pub const ALL: [TimeUnit; 6] = [
        TimeUnit::Today,
        TimeUnit::Week,
        TimeUnit::Month,
        TimeUnit::Season,
        TimeUnit::Year,
        TimeUnit::MultiYear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::Season => "season",
            Self::Year => "year",
            Self::MultiYear => "multi_year",
        }
    }

    /// Next bucket on the escalation ladder.
    ///
    /// `Year` and `MultiYear` are terminal: nothing flows out of them.
    pub fn flows_into(self) -> Option<TimeUnit> {
        match self {
            Self::Today => Some(Self::Week),
            Self::Week => Some(Self::Month),
            Self::Month => Some(Self::Season),
            Self::Season => Some(Self::Year),
            Self::Year | Self::MultiYear => None,
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "season" => Ok(Self::Season),
            "year" => Ok(Self::Year),
            "multi_year" => Ok(Self::MultiYear),
            other => Err(ParseEnumError::UnknownTimeUnit(other.to_string())),
        }
    }
}

/// Rule branch selector for flow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoType {
    /// Escalates along the ladder and otherwise ages in place.
    Normal,
    /// Escalates like `Normal`, and resets its completion window at
    /// period boundaries.
    Maintenance,
}

impl DoType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Maintenance => "maintenance",
        }
    }
}

impl Display for DoType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoType {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "normal" => Ok(Self::Normal),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(ParseEnumError::UnknownDoType(other.to_string())),
        }
    }
}

/// Unrecognized enum value in external data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEnumError {
    UnknownTimeUnit(String),
    UnknownDoType(String),
}

impl Display for ParseEnumError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTimeUnit(value) => write!(f, "unknown time unit `{value}`"),
            Self::UnknownDoType(value) => write!(f, "unknown do type `{value}`"),
        }
    }
}

impl Error for ParseEnumError {}

/// Model-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoValidationError {
    BlankTitle,
    CompletedAtWithoutCompletion,
}

impl Display for DoValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "do title must not be blank"),
            Self::CompletedAtWithoutCompletion => {
                write!(f, "completed_at is set but the do is not completed")
            }
        }
    }
}

impl Error for DoValidationError {}

/// A task item tracked at a specific time-scale bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Do {
    pub id: DoId,
    pub user_id: UserId,
    /// Display text. Opaque to flow-up.
    pub title: String,
    pub time_unit: TimeUnit,
    pub do_type: DoType,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Runs spent in the current bucket or maintenance period.
    pub days_in_unit: u32,
    /// Lifetime count of bucket advances.
    pub flow_count: u32,
    /// Completions within the current window.
    pub completion_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Do {
    /// Creates a fresh, uncompleted do with a generated id and zeroed counters.
    pub fn new(
        user_id: UserId,
        title: impl Into<String>,
        time_unit: TimeUnit,
        do_type: DoType,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), user_id, title, time_unit, do_type, now)
    }

    /// Creates a fresh do with a caller-provided id.
    ///
    /// Used by tests and import paths where identity already exists.
    pub fn with_id(
        id: DoId,
        user_id: UserId,
        title: impl Into<String>,
        time_unit: TimeUnit,
        do_type: DoType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            title: title.into(),
            time_unit,
            do_type,
            completed: false,
            completed_at: None,
            days_in_unit: 0,
            flow_count: 0,
            completion_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), DoValidationError> {
        if self.title.trim().is_empty() {
            return Err(DoValidationError::BlankTitle);
        }
        if self.completed_at.is_some() && !self.completed {
            return Err(DoValidationError::CompletedAtWithoutCompletion);
        }
        Ok(())
    }

    pub fn is_maintenance(&self) -> bool {
        self.do_type == DoType::Maintenance
    }
}
