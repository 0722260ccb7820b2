//! Per-item transition rules for flow-up.
//!
//! # Responsibility
//! - Map (bucket, kind, boundary flags) to the next persisted state.
//! - Name the bucket transition, if any, for run summaries.
//!
//! # Invariants
//! - At most one escalation step per evaluation.
//! - Escalation takes priority over maintenance period resets.
//! - Exactly one of advance / period reset / stay applies to every item.
//! - `updated_at` is always set to the run's `now`.

use crate::flow::boundary::BoundaryFlags;
use crate::model::do_item::{Do, DoId, DoType, TimeUnit, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Partial do record written back by a flow-up run.
///
/// Every branch produces the same field set so the bulk write is
/// homogeneous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowUpdate {
    pub id: DoId,
    pub user_id: UserId,
    pub title: String,
    pub time_unit: TimeUnit,
    pub flow_count: u32,
    pub completion_count: u32,
    pub days_in_unit: u32,
    pub updated_at: DateTime<Utc>,
}

/// A single bucket advance, e.g. `today_to_week`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Transition {
    pub from: TimeUnit,
    pub to: TimeUnit,
}

impl Transition {
    pub fn label(&self) -> String {
        format!("{}_to_{}", self.from, self.to)
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_to_{}", self.from, self.to)
    }
}

/// Which branch of the rule table applied to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Advanced(Transition),
    /// Maintenance completion window restarted without changing bucket.
    PeriodReset,
    Stayed,
}

impl Outcome {
    pub fn transition(self) -> Option<Transition> {
        match self {
            Self::Advanced(transition) => Some(transition),
            Self::PeriodReset | Self::Stayed => None,
        }
    }
}

/// Returns the bucket `unit` escalates into under `flags`, if any.
pub fn escalation_target(unit: TimeUnit, flags: BoundaryFlags) -> Option<TimeUnit> {
    let fires = match unit {
        TimeUnit::Today => true,
        TimeUnit::Week => flags.is_monday,
        TimeUnit::Month => flags.is_first_of_month,
        TimeUnit::Season => flags.is_season_start,
        TimeUnit::Year | TimeUnit::MultiYear => false,
    };
    if fires {
        unit.flows_into()
    } else {
        None
    }
}

fn is_period_boundary(unit: TimeUnit, flags: BoundaryFlags) -> bool {
    match unit {
        TimeUnit::Year => flags.is_new_year,
        TimeUnit::MultiYear => flags.is_cycle_year,
        _ => false,
    }
}

/// Evaluates the rule table for one item and reports which branch applied.
pub fn evaluate(item: &Do, flags: BoundaryFlags, now: DateTime<Utc>) -> (FlowUpdate, Outcome) {
    let mut update = FlowUpdate {
        id: item.id,
        user_id: item.user_id,
        title: item.title.clone(),
        time_unit: item.time_unit,
        flow_count: item.flow_count,
        completion_count: item.completion_count,
        days_in_unit: item.days_in_unit,
        updated_at: now,
    };

    if let Some(next) = escalation_target(item.time_unit, flags) {
        update.time_unit = next;
        update.flow_count = item.flow_count.saturating_add(1);
        update.days_in_unit = 0;
        if item.is_maintenance() {
            update.completion_count = 0;
        }
        let transition = Transition {
            from: item.time_unit,
            to: next,
        };
        return (update, Outcome::Advanced(transition));
    }

    match item.do_type {
        DoType::Maintenance if is_period_boundary(item.time_unit, flags) => {
            update.completion_count = 0;
            update.days_in_unit = 0;
            (update, Outcome::PeriodReset)
        }
        DoType::Normal | DoType::Maintenance => {
            update.days_in_unit = item.days_in_unit.saturating_add(1);
            (update, Outcome::Stayed)
        }
    }
}

/// Computes an item's next state and its transition, if it advanced.
pub fn next_state(
    item: &Do,
    flags: BoundaryFlags,
    now: DateTime<Utc>,
) -> (FlowUpdate, Option<Transition>) {
    let (update, outcome) = evaluate(item, flags, now);
    (update, outcome.transition())
}
