use chrono::{DateTime, TimeZone, Utc};
use flowdo_core::db::{open_db, open_db_in_memory, DbError};
use flowdo_core::{
    classify, next_state, run_flow_up, Do, DoRepository, DoService, DoType, FlowUpError,
    FlowUpStore, FlowUpdate, RepoError, RepoResult, SqliteDoRepository, TimeUnit,
};
use std::cell::RefCell;
use std::time::Duration;
use uuid::Uuid;

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 5, 0).unwrap()
}

fn seeded(unit: TimeUnit, kind: DoType) -> Do {
    Do::new(Uuid::new_v4(), "Test do", unit, kind, at(2025, 6, 1))
}

#[test]
fn scenario_today_item_always_flows_to_week() {
    let item = seeded(TimeUnit::Today, DoType::Normal);
    let now = at(2026, 7, 16);
    let (update, transition) = next_state(&item, classify(now), now);

    assert_eq!(update.time_unit, TimeUnit::Week);
    assert_eq!(update.flow_count, 1);
    assert_eq!(update.days_in_unit, 0);
    assert_eq!(transition.unwrap().label(), "today_to_week");
}

#[test]
fn scenario_week_item_ages_on_tuesday() {
    let mut item = seeded(TimeUnit::Week, DoType::Normal);
    item.flow_count = 1;
    item.days_in_unit = 3;
    let tuesday = at(2026, 2, 10);
    let (update, transition) = next_state(&item, classify(tuesday), tuesday);

    assert_eq!(update.time_unit, TimeUnit::Week);
    assert_eq!(update.days_in_unit, 4);
    assert_eq!(update.flow_count, 1);
    assert!(transition.is_none());
}

#[test]
fn scenario_multi_year_maintenance_waits_for_cycle_year() {
    let mut item = seeded(TimeUnit::MultiYear, DoType::Maintenance);
    item.completion_count = 6;
    item.days_in_unit = 100;

    let non_cycle = at(2026, 1, 1);
    let (update, transition) = next_state(&item, classify(non_cycle), non_cycle);
    assert_eq!(update.completion_count, 6);
    assert_eq!(update.days_in_unit, 101);
    assert!(transition.is_none());

    let cycle = at(2025, 1, 1);
    let (update, transition) = next_state(&item, classify(cycle), cycle);
    assert_eq!(update.completion_count, 0);
    assert_eq!(update.days_in_unit, 0);
    assert!(transition.is_none());
}

#[test]
fn run_against_sqlite_persists_every_item() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDoRepository::new(&conn);

    let mut todays = Vec::new();
    for _ in 0..3 {
        let item = seeded(TimeUnit::Today, DoType::Normal);
        repo.create_do(&item).unwrap();
        todays.push(item);
    }
    let mut completed_week = seeded(TimeUnit::Week, DoType::Normal);
    completed_week.completed = true;
    completed_week.completed_at = Some(at(2026, 2, 8));
    repo.create_do(&completed_week).unwrap();
    let mut yearly_chore = seeded(TimeUnit::Year, DoType::Maintenance);
    yearly_chore.completion_count = 4;
    yearly_chore.days_in_unit = 30;
    repo.create_do(&yearly_chore).unwrap();

    let monday = at(2026, 2, 9);
    let summary = run_flow_up(&repo, monday).unwrap();

    assert_eq!(
        serde_json::to_value(&summary).unwrap(),
        serde_json::json!({"today_to_week": 3, "week_to_month": 1})
    );

    for item in &todays {
        let stored = repo.get_do(item.id).unwrap().unwrap();
        assert_eq!(stored.time_unit, TimeUnit::Week);
        assert_eq!(stored.flow_count, 1);
        assert_eq!(stored.updated_at, monday);
    }

    let stored_week = repo.get_do(completed_week.id).unwrap().unwrap();
    assert_eq!(stored_week.time_unit, TimeUnit::Month);
    assert!(stored_week.completed);
    assert_eq!(stored_week.completed_at, completed_week.completed_at);

    let stored_chore = repo.get_do(yearly_chore.id).unwrap().unwrap();
    assert_eq!(stored_chore.time_unit, TimeUnit::Year);
    assert_eq!(stored_chore.completion_count, 4);
    assert_eq!(stored_chore.days_in_unit, 31);
    assert_eq!(stored_chore.created_at, yearly_chore.created_at);
}

#[test]
fn consecutive_daily_runs_walk_an_item_up_the_ladder() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDoRepository::new(&conn);
    let item = seeded(TimeUnit::Today, DoType::Maintenance);
    repo.create_do(&item).unwrap();

    // Fri 2026-02-27 .. Sun 2026-03-01.
    run_flow_up(&repo, at(2026, 2, 27)).unwrap();
    run_flow_up(&repo, at(2026, 2, 28)).unwrap();
    let stored = repo.get_do(item.id).unwrap().unwrap();
    assert_eq!(stored.time_unit, TimeUnit::Week);
    assert_eq!(stored.days_in_unit, 1);

    run_flow_up(&repo, at(2026, 3, 1)).unwrap();
    let stored = repo.get_do(item.id).unwrap().unwrap();
    assert_eq!(stored.time_unit, TimeUnit::Week);
    assert_eq!(stored.days_in_unit, 2);

    let summary = run_flow_up(&repo, at(2026, 3, 2)).unwrap();
    assert_eq!(summary.get("week_to_month"), 1);
    let stored = repo.get_do(item.id).unwrap().unwrap();
    assert_eq!(stored.time_unit, TimeUnit::Month);
    assert_eq!(stored.flow_count, 2);
    assert_eq!(stored.days_in_unit, 0);
}

#[test]
fn bulk_upsert_is_all_or_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDoRepository::new(&conn);
    let kept = seeded(TimeUnit::Today, DoType::Normal);
    repo.create_do(&kept).unwrap();
    let vanished = seeded(TimeUnit::Today, DoType::Normal);

    let now = at(2026, 2, 10);
    let updates: Vec<_> = [&kept, &vanished]
        .into_iter()
        .map(|item| next_state(item, classify(now), now).0)
        .collect();

    let err = repo.bulk_upsert(&updates).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == vanished.id));

    let stored = repo.get_do(kept.id).unwrap().unwrap();
    assert_eq!(stored.time_unit, TimeUnit::Today);
    assert_eq!(stored.flow_count, 0);
}

#[test]
fn malformed_row_aborts_run_without_writes() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDoRepository::new(&conn);
    let good = seeded(TimeUnit::Today, DoType::Normal);
    let bad = seeded(TimeUnit::Today, DoType::Normal);
    repo.create_do(&good).unwrap();
    repo.create_do(&bad).unwrap();

    conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
        .unwrap();
    conn.execute(
        "UPDATE dos SET time_unit = 'decade' WHERE id = ?1;",
        [bad.id.to_string()],
    )
    .unwrap();

    let err = run_flow_up(&repo, at(2026, 2, 10)).unwrap_err();
    assert!(matches!(err, flowdo_core::FlowUpError::Fetch(RepoError::InvalidData(_))));

    let stored = repo.get_do(good.id).unwrap().unwrap();
    assert_eq!(stored.time_unit, TimeUnit::Today);
}

/// Engine-side store that has a second connection record a completion
/// while the flow-up read is in flight.
struct CompletingDuringFetch<'conn> {
    engine: SqliteDoRepository<'conn>,
    user: DoService<SqliteDoRepository<'conn>>,
    owner: Uuid,
    id: Uuid,
    completed_at: DateTime<Utc>,
    attempt: RefCell<Option<RepoResult<Do>>>,
}

impl FlowUpStore for CompletingDuringFetch<'_> {
    fn fetch_all(&self) -> RepoResult<Vec<Do>> {
        let items = self.engine.fetch_all()?;
        let attempt = self
            .user
            .record_completion(self.owner, self.id, self.completed_at);
        *self.attempt.borrow_mut() = Some(attempt);
        Ok(items)
    }

    fn bulk_upsert(&self, updates: &[FlowUpdate]) -> RepoResult<()> {
        self.engine.bulk_upsert(updates)
    }

    fn with_write_lock<T>(
        &self,
        apply: impl FnOnce() -> Result<T, FlowUpError>,
    ) -> Result<T, FlowUpError> {
        self.engine.with_write_lock(apply)
    }
}

#[test]
fn completion_from_another_connection_is_not_overwritten_by_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowdo.sqlite3");
    let engine_conn = open_db(&path).unwrap();
    let user_conn = open_db(&path).unwrap();
    user_conn.busy_timeout(Duration::ZERO).unwrap();

    let owner = Uuid::new_v4();
    let mut item = seeded(TimeUnit::Week, DoType::Normal);
    item.user_id = owner;
    SqliteDoRepository::new(&engine_conn).create_do(&item).unwrap();

    let tuesday = at(2026, 2, 10);
    let store = CompletingDuringFetch {
        engine: SqliteDoRepository::new(&engine_conn),
        user: DoService::new(SqliteDoRepository::new(&user_conn)),
        owner,
        id: item.id,
        completed_at: tuesday,
        attempt: RefCell::new(None),
    };
    run_flow_up(&store, tuesday).unwrap();

    // The run held the write lock from before its read.
    let attempt = store.attempt.take().unwrap();
    assert!(matches!(
        attempt,
        Err(RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))))
            if failure.code == rusqlite::ErrorCode::DatabaseBusy
    ));

    let retried = store
        .user
        .record_completion(owner, item.id, tuesday)
        .unwrap();
    assert_eq!(retried.completion_count, 1);
    assert_eq!(retried.days_in_unit, 1);

    let stored = SqliteDoRepository::new(&engine_conn)
        .get_do(item.id)
        .unwrap()
        .unwrap();
    assert!(stored.completed);
    assert_eq!(stored.completion_count, 1);
    assert_eq!(stored.days_in_unit, 1);
    assert_eq!(stored.time_unit, TimeUnit::Week);
}

#[test]
fn failed_run_releases_the_write_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowdo.sqlite3");
    let engine_conn = open_db(&path).unwrap();
    let user_conn = open_db(&path).unwrap();
    user_conn.busy_timeout(Duration::ZERO).unwrap();

    let repo = SqliteDoRepository::new(&engine_conn);
    let good = seeded(TimeUnit::Today, DoType::Normal);
    repo.create_do(&good).unwrap();
    let bad = seeded(TimeUnit::Today, DoType::Normal);
    repo.create_do(&bad).unwrap();
    engine_conn
        .execute_batch("PRAGMA ignore_check_constraints = ON;")
        .unwrap();
    engine_conn
        .execute(
            "UPDATE dos SET flow_count = -1 WHERE id = ?1;",
            [bad.id.to_string()],
        )
        .unwrap();

    let err = run_flow_up(&repo, at(2026, 2, 10)).unwrap_err();
    assert!(matches!(err, FlowUpError::Fetch(RepoError::InvalidData(_))));
    assert!(engine_conn.is_autocommit());

    let user = DoService::new(SqliteDoRepository::new(&user_conn));
    let done = user
        .record_completion(good.user_id, good.id, at(2026, 2, 10))
        .unwrap();
    assert_eq!(done.completion_count, 1);
    assert_eq!(done.time_unit, TimeUnit::Today);
}
