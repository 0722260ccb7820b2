//! Flow-up batch applier.
//!
//! # Responsibility
//! - Classify `now` once and apply the rule table to every item.
//! - Commit all resulting states through one bulk write.
//! - Report how many items moved per transition.
//!
//! # Invariants
//! - Exactly one fetch and at most one bulk write per run.
//! - Fetch and write happen under the store's write lock, so no other
//!   writer lands between them.
//! - The summary is returned only after the write succeeds.
//! - Runs inside one process never overlap.

use crate::flow::boundary::{classify, BoundaryFlags};
use crate::flow::rules::{next_state, FlowUpdate};
use crate::model::do_item::Do;
use crate::repo::do_repo::{RepoError, RepoResult};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;
use std::time::Instant;

static RUN_LOCK: Mutex<()> = Mutex::new(());

/// Persistence capabilities flow-up needs from its store.
pub trait FlowUpStore {
    /// Returns every do, completed or not.
    fn fetch_all(&self) -> RepoResult<Vec<Do>>;
    /// Overwrites the flow-up fields of each record matched by `id`.
    ///
    /// Must apply all records or none.
    fn bulk_upsert(&self, updates: &[FlowUpdate]) -> RepoResult<()>;

    /// Runs `apply` while holding the store's write lock.
    ///
    /// Writes made by `apply` are kept only when it returns `Ok`. The
    /// default takes no lock, which is enough for stores nobody else writes.
    fn with_write_lock<T>(
        &self,
        apply: impl FnOnce() -> Result<T, FlowUpError>,
    ) -> Result<T, FlowUpError> {
        apply()
    }
}

/// Transition label -> number of items that took it during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowUpSummary(BTreeMap<String, u32>);

impl FlowUpSummary {
    pub fn record(&mut self, label: String) {
        *self.0.entry(label).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u32 {
        self.0.get(label).copied().unwrap_or(0)
    }

    pub fn total_moved(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, u32> {
        &self.0
    }
}

impl Display for FlowUpSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (label, count) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{label}:{count}")?;
            first = false;
        }
        Ok(())
    }
}

/// Computed, not yet applied, result of a flow-up run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowUpPlan {
    pub updates: Vec<FlowUpdate>,
    pub summary: FlowUpSummary,
}

/// Flow-up run failure.
#[derive(Debug)]
pub enum FlowUpError {
    /// Items could not be loaded; nothing was computed or written.
    Fetch(RepoError),
    /// The bulk write failed after computation.
    Write(RepoError),
}

impl Display for FlowUpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "flow-up failed to fetch dos: {err}"),
            Self::Write(err) => write!(f, "flow-up failed to apply updates: {err}"),
        }
    }
}

impl FlowUpError {
    fn code(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch_failed",
            Self::Write(_) => "write_failed",
        }
    }
}

impl Error for FlowUpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) | Self::Write(err) => Some(err),
        }
    }
}

/// Computes every item's next state for `now` without touching storage.
pub fn plan_flow_up(items: &[Do], now: DateTime<Utc>) -> FlowUpPlan {
    plan_with_flags(items, classify(now), now)
}

fn plan_with_flags(items: &[Do], flags: BoundaryFlags, now: DateTime<Utc>) -> FlowUpPlan {
    let mut summary = FlowUpSummary::default();
    let mut updates = Vec::with_capacity(items.len());

    for item in items {
        let (update, transition) = next_state(item, flags, now);
        if let Some(transition) = transition {
            summary.record(transition.label());
        }
        updates.push(update);
    }

    FlowUpPlan { updates, summary }
}

/// Runs flow-up for all stored dos as of `now`.
///
/// # Errors
/// - `FlowUpError::Fetch` when the store cannot be locked or cannot list dos.
/// - `FlowUpError::Write` when the bulk write or its commit fails.
pub fn run_flow_up<S: FlowUpStore>(
    store: &S,
    now: DateTime<Utc>,
) -> Result<FlowUpSummary, FlowUpError> {
    // The lock guards no data, so a poisoned guard is still usable.
    let _guard = RUN_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let started_at = Instant::now();
    let flags = classify(now);
    info!(
        "event=flow_up module=flow status=start now={} {}",
        now.to_rfc3339(),
        flags
    );

    let result = store.with_write_lock(|| {
        let items = store.fetch_all().map_err(FlowUpError::Fetch)?;
        let plan = plan_with_flags(&items, flags, now);
        if !plan.updates.is_empty() {
            store
                .bulk_upsert(&plan.updates)
                .map_err(FlowUpError::Write)?;
        }
        Ok(plan)
    });

    let plan = match result {
        Ok(plan) => plan,
        Err(err) => {
            error!(
                "event=flow_up module=flow status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            return Err(err);
        }
    };

    info!(
        "event=flow_up module=flow status=ok duration_ms={} items={} moved_total={} moved={}",
        started_at.elapsed().as_millis(),
        plan.updates.len(),
        plan.summary.total_moved(),
        plan.summary
    );
    Ok(plan.summary)
}

/// Runs flow-up as of the current time.
pub fn run_flow_up_now<S: FlowUpStore>(store: &S) -> Result<FlowUpSummary, FlowUpError> {
    run_flow_up(store, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::{plan_flow_up, run_flow_up, FlowUpError, FlowUpStore, FlowUpSummary};
    use crate::flow::rules::FlowUpdate;
    use crate::model::do_item::{Do, DoType, TimeUnit};
    use crate::repo::do_repo::{RepoError, RepoResult};
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Sender};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    fn a_monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 9, 3, 0, 0).unwrap()
    }

    fn item(unit: TimeUnit) -> Do {
        Do::new(
            Uuid::new_v4(),
            "Test do",
            unit,
            DoType::Normal,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[derive(Default)]
    struct FakeStore {
        items: Vec<Do>,
        fail_fetch: bool,
        fail_write: bool,
        writes: RefCell<Vec<Vec<FlowUpdate>>>,
    }

    impl FlowUpStore for FakeStore {
        fn fetch_all(&self) -> RepoResult<Vec<Do>> {
            if self.fail_fetch {
                return Err(RepoError::InvalidData("store offline".to_string()));
            }
            Ok(self.items.clone())
        }

        fn bulk_upsert(&self, updates: &[FlowUpdate]) -> RepoResult<()> {
            if self.fail_write {
                return Err(RepoError::InvalidData("write rejected".to_string()));
            }
            self.writes.borrow_mut().push(updates.to_vec());
            Ok(())
        }
    }

    /// Shared across threads; the first fetch signals `entered` and stalls.
    struct SlowStore {
        events: Mutex<Vec<&'static str>>,
        entered: Mutex<Option<Sender<()>>>,
    }

    impl SlowStore {
        fn push(&self, event: &'static str) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl FlowUpStore for SlowStore {
        fn fetch_all(&self) -> RepoResult<Vec<Do>> {
            self.push("fetch");
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                entered.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
            }
            Ok(vec![item(TimeUnit::Today)])
        }

        fn bulk_upsert(&self, _updates: &[FlowUpdate]) -> RepoResult<()> {
            self.push("write");
            Ok(())
        }

        fn with_write_lock<T>(
            &self,
            apply: impl FnOnce() -> Result<T, FlowUpError>,
        ) -> Result<T, FlowUpError> {
            self.push("lock");
            let result = apply();
            self.push("unlock");
            result
        }
    }

    struct PanickingStore {
        panicked: AtomicBool,
    }

    impl FlowUpStore for PanickingStore {
        fn fetch_all(&self) -> RepoResult<Vec<Do>> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("store crashed mid-run");
            }
            Ok(vec![item(TimeUnit::Today)])
        }

        fn bulk_upsert(&self, _updates: &[FlowUpdate]) -> RepoResult<()> {
            Ok(())
        }
    }

    #[test]
    fn overlapping_runs_are_serialized() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let store = SlowStore {
            events: Mutex::default(),
            entered: Mutex::new(Some(entered_tx)),
        };

        thread::scope(|scope| {
            let first = scope.spawn(|| run_flow_up(&store, a_monday()));
            entered_rx.recv().unwrap();
            let second = scope.spawn(|| run_flow_up(&store, a_monday()));
            assert_eq!(first.join().unwrap().unwrap().get("today_to_week"), 1);
            assert_eq!(second.join().unwrap().unwrap().get("today_to_week"), 1);
        });

        assert_eq!(
            *store.events.lock().unwrap(),
            vec!["lock", "fetch", "write", "unlock", "lock", "fetch", "write", "unlock"]
        );
    }

    #[test]
    fn run_after_a_panicking_run_still_succeeds() {
        let store = PanickingStore {
            panicked: AtomicBool::new(false),
        };

        let crashed = thread::scope(|scope| {
            scope
                .spawn(|| run_flow_up(&store, a_monday()))
                .join()
        });
        assert!(crashed.is_err());

        let summary = run_flow_up(&store, a_monday()).unwrap();
        assert_eq!(summary.get("today_to_week"), 1);
    }

    #[test]
    fn summary_counts_transitions_per_label() {
        let items = vec![
            item(TimeUnit::Today),
            item(TimeUnit::Today),
            item(TimeUnit::Today),
            item(TimeUnit::Week),
        ];
        let plan = plan_flow_up(&items, a_monday());

        assert_eq!(plan.updates.len(), 4);
        assert_eq!(plan.summary.get("today_to_week"), 3);
        assert_eq!(plan.summary.get("week_to_month"), 1);
        assert_eq!(plan.summary.as_map().len(), 2);
        assert_eq!(
            serde_json::to_value(&plan.summary).unwrap(),
            serde_json::json!({"today_to_week": 3, "week_to_month": 1})
        );
    }

    #[test]
    fn staying_items_are_still_written() {
        let items = vec![item(TimeUnit::Year), item(TimeUnit::MultiYear)];
        let plan = plan_flow_up(&items, a_monday());
        assert_eq!(plan.updates.len(), 2);
        assert!(plan.summary.is_empty());
    }

    #[test]
    fn run_issues_exactly_one_bulk_write() {
        let store = FakeStore {
            items: vec![item(TimeUnit::Today), item(TimeUnit::Season)],
            ..FakeStore::default()
        };
        let summary = run_flow_up(&store, a_monday()).unwrap();

        assert_eq!(summary.total_moved(), 1);
        let writes = store.writes.borrow();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 2);
    }

    #[test]
    fn empty_store_skips_write() {
        let store = FakeStore::default();
        let summary = run_flow_up(&store, a_monday()).unwrap();
        assert_eq!(summary, FlowUpSummary::default());
        assert!(store.writes.borrow().is_empty());
    }

    #[test]
    fn fetch_failure_aborts_before_writing() {
        let store = FakeStore {
            items: vec![item(TimeUnit::Today)],
            fail_fetch: true,
            ..FakeStore::default()
        };
        let err = run_flow_up(&store, a_monday()).unwrap_err();
        assert!(matches!(err, FlowUpError::Fetch(_)));
        assert!(store.writes.borrow().is_empty());
    }

    #[test]
    fn write_failure_is_reported_without_summary() {
        let store = FakeStore {
            items: vec![item(TimeUnit::Today)],
            fail_write: true,
            ..FakeStore::default()
        };
        let err = run_flow_up(&store, a_monday()).unwrap_err();
        assert!(matches!(err, FlowUpError::Write(_)));
        assert!(err.to_string().contains("apply updates"));
    }

    #[test]
    fn summary_display_is_compact() {
        let mut summary = FlowUpSummary::default();
        assert_eq!(summary.to_string(), "none");
        summary.record("week_to_month".to_string());
        summary.record("today_to_week".to_string());
        summary.record("today_to_week".to_string());
        assert_eq!(summary.to_string(), "today_to_week:2,week_to_month:1");
    }
}
