//! Calendar boundary classification for a flow-up run.
//!
//! # Invariants
//! - Flags are a pure function of the UTC calendar fields of `now`.

use chrono::{DateTime, Datelike, Utc, Weekday};
use std::fmt::{Display, Formatter};

const SEASON_START_MONTHS: [u32; 4] = [3, 6, 9, 12];
const MULTI_YEAR_CYCLE: i32 = 3;

/// Calendar boundaries that gate escalation and period resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundaryFlags {
    pub is_monday: bool,
    pub is_first_of_month: bool,
    /// First day of a meteorological season (Mar/Jun/Sep/Dec 1).
    pub is_season_start: bool,
    pub is_new_year: bool,
    /// Jan 1 of a year divisible by 3.
    pub is_cycle_year: bool,
}

impl BoundaryFlags {
    pub fn classify(now: DateTime<Utc>) -> Self {
        let is_first_of_month = now.day() == 1;
        let is_new_year = is_first_of_month && now.month() == 1;

        Self {
            is_monday: now.weekday() == Weekday::Mon,
            is_first_of_month,
            is_season_start: is_first_of_month && SEASON_START_MONTHS.contains(&now.month()),
            is_new_year,
            is_cycle_year: is_new_year && now.year().rem_euclid(MULTI_YEAR_CYCLE) == 0,
        }
    }
}

impl Display for BoundaryFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "monday={} first_of_month={} season_start={} new_year={} cycle_year={}",
            self.is_monday,
            self.is_first_of_month,
            self.is_season_start,
            self.is_new_year,
            self.is_cycle_year
        )
    }
}

/// Derives boundary flags for `now`.
pub fn classify(now: DateTime<Utc>) -> BoundaryFlags {
    BoundaryFlags::classify(now)
}
