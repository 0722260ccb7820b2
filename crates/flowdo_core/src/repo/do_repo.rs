//! Do repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD APIs over canonical `dos` storage.
//! - Serve as the flow-up persistence collaborator.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths must call `Do::validate()` before SQL mutations.
//! - Read paths must reject invalid persisted state instead of masking it.
//! - Flow-up bulk writes are all-or-nothing.
//! - A flow-up run reads and writes inside one IMMEDIATE transaction.

use crate::db::DbError;
use crate::flow::engine::{FlowUpError, FlowUpStore};
use crate::flow::rules::FlowUpdate;
use crate::model::do_item::{Do, DoId, DoType, DoValidationError, TimeUnit, UserId};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const DO_SELECT_SQL: &str = "SELECT
    id,
    user_id,
    title,
    time_unit,
    do_type,
    completed,
    completed_at,
    days_in_unit,
    flow_count,
    completion_count,
    created_at,
    updated_at
FROM dos";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for do persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(DoValidationError),
    Db(DbError),
    NotFound(DoId),
    /// Stored row violates the data contract (unknown enum, bad id, ...).
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "do not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted do data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DoValidationError> for RepoError {
    fn from(value: DoValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing dos.
#[derive(Debug, Clone, Default)]
pub struct DoListQuery {
    /// Restrict to one owner. `None` lists every owner's dos.
    pub user_id: Option<UserId>,
    pub time_unit: Option<TimeUnit>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for do CRUD operations.
pub trait DoRepository {
    fn create_do(&self, item: &Do) -> RepoResult<DoId>;
    fn update_do(&self, item: &Do) -> RepoResult<()>;
    fn get_do(&self, id: DoId) -> RepoResult<Option<Do>>;
    fn list_dos(&self, query: &DoListQuery) -> RepoResult<Vec<Do>>;
    fn delete_do(&self, id: DoId) -> RepoResult<()>;
}

/// SQLite-backed do repository.
pub struct SqliteDoRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDoRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl DoRepository for SqliteDoRepository<'_> {
    fn create_do(&self, item: &Do) -> RepoResult<DoId> {
        item.validate()?;

        self.conn.execute(
            "INSERT INTO dos (
                id,
                user_id,
                title,
                time_unit,
                do_type,
                completed,
                completed_at,
                days_in_unit,
                flow_count,
                completion_count,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
            params![
                item.id.to_string(),
                item.user_id.to_string(),
                item.title.as_str(),
                item.time_unit.as_str(),
                item.do_type.as_str(),
                bool_to_int(item.completed),
                item.completed_at.map(timestamp_to_db),
                item.days_in_unit,
                item.flow_count,
                item.completion_count,
                timestamp_to_db(item.created_at),
                timestamp_to_db(item.updated_at),
            ],
        )?;

        Ok(item.id)
    }

    fn update_do(&self, item: &Do) -> RepoResult<()> {
        item.validate()?;

        let changed = self.conn.execute(
            "UPDATE dos
             SET
                title = ?1,
                time_unit = ?2,
                do_type = ?3,
                completed = ?4,
                completed_at = ?5,
                days_in_unit = ?6,
                flow_count = ?7,
                completion_count = ?8,
                updated_at = ?9
             WHERE id = ?10;",
            params![
                item.title.as_str(),
                item.time_unit.as_str(),
                item.do_type.as_str(),
                bool_to_int(item.completed),
                item.completed_at.map(timestamp_to_db),
                item.days_in_unit,
                item.flow_count,
                item.completion_count,
                timestamp_to_db(item.updated_at),
                item.id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(item.id));
        }

        Ok(())
    }

    fn get_do(&self, id: DoId) -> RepoResult<Option<Do>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DO_SELECT_SQL} WHERE id = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_do_row(row)?));
        }

        Ok(None)
    }

    fn list_dos(&self, query: &DoListQuery) -> RepoResult<Vec<Do>> {
        let mut sql = format!("{DO_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(user_id) = query.user_id {
            sql.push_str(" AND user_id = ?");
            bind_values.push(Value::Text(user_id.to_string()));
        }

        if let Some(time_unit) = query.time_unit {
            sql.push_str(" AND time_unit = ?");
            bind_values.push(Value::Text(time_unit.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();

        while let Some(row) = rows.next()? {
            items.push(parse_do_row(row)?);
        }

        Ok(items)
    }

    fn delete_do(&self, id: DoId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM dos WHERE id = ?1;", [id.to_string()])?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

impl FlowUpStore for SqliteDoRepository<'_> {
    fn fetch_all(&self) -> RepoResult<Vec<Do>> {
        self.list_dos(&DoListQuery::default())
    }

    fn bulk_upsert(&self, updates: &[FlowUpdate]) -> RepoResult<()> {
        // Under `with_write_lock` the enclosing transaction already holds the
        // write lock and rolls the batch back on error.
        let tx = if self.conn.is_autocommit() {
            Some(Transaction::new_unchecked(
                self.conn,
                TransactionBehavior::Immediate,
            )?)
        } else {
            None
        };
        {
            let mut stmt = self.conn.prepare(
                "UPDATE dos
                 SET
                    title = ?1,
                    time_unit = ?2,
                    flow_count = ?3,
                    completion_count = ?4,
                    days_in_unit = ?5,
                    updated_at = ?6
                 WHERE id = ?7 AND user_id = ?8;",
            )?;

            for update in updates {
                let changed = stmt.execute(params![
                    update.title.as_str(),
                    update.time_unit.as_str(),
                    update.flow_count,
                    update.completion_count,
                    update.days_in_unit,
                    timestamp_to_db(update.updated_at),
                    update.id.to_string(),
                    update.user_id.to_string(),
                ])?;
                if changed == 0 {
                    return Err(RepoError::NotFound(update.id));
                }
            }
        }
        if let Some(tx) = tx {
            tx.commit()?;
        }

        debug!(
            "event=dos_bulk_upsert module=repo status=ok records={}",
            updates.len()
        );
        Ok(())
    }

    fn with_write_lock<T>(
        &self,
        apply: impl FnOnce() -> Result<T, FlowUpError>,
    ) -> Result<T, FlowUpError> {
        // IMMEDIATE takes the write lock before the read, so another
        // connection cannot commit between `fetch_all` and `bulk_upsert`.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| FlowUpError::Fetch(err.into()))?;
        // Dropping `tx` on error or panic rolls everything back.
        let value = apply()?;
        tx.commit()
            .map_err(|err| FlowUpError::Write(err.into()))?;
        Ok(value)
    }
}

fn parse_do_row(row: &Row<'_>) -> RepoResult<Do> {
    let id = parse_uuid(row, "id")?;
    let user_id = parse_uuid(row, "user_id")?;

    let time_unit_text: String = row.get("time_unit")?;
    let time_unit = time_unit_text
        .parse::<TimeUnit>()
        .map_err(|err| RepoError::InvalidData(format!("{err} in dos.time_unit for {id}")))?;

    let do_type_text: String = row.get("do_type")?;
    let do_type = do_type_text
        .parse::<DoType>()
        .map_err(|err| RepoError::InvalidData(format!("{err} in dos.do_type for {id}")))?;

    let completed = match row.get::<_, i64>("completed")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid completed value `{other}` in dos.completed for {id}"
            )));
        }
    };

    let completed_at = match row.get::<_, Option<String>>("completed_at")? {
        Some(text) => Some(parse_timestamp(&text, "completed_at")?),
        None => None,
    };

    let item = Do {
        id,
        user_id,
        title: row.get("title")?,
        time_unit,
        do_type,
        completed,
        completed_at,
        days_in_unit: parse_counter(row, "days_in_unit")?,
        flow_count: parse_counter(row, "flow_count")?,
        completion_count: parse_counter(row, "completion_count")?,
        created_at: parse_timestamp(&row.get::<_, String>("created_at")?, "created_at")?,
        updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?, "updated_at")?,
    };
    item.validate()?;
    Ok(item)
}

fn parse_uuid(row: &Row<'_>, column: &str) -> RepoResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{text}` in dos.{column}")))
}

fn parse_counter(row: &Row<'_>, column: &str) -> RepoResult<u32> {
    let value: i64 = row.get(column)?;
    u32::try_from(value).map_err(|_| {
        RepoError::InvalidData(format!("counter out of range `{value}` in dos.{column}"))
    })
}

fn parse_timestamp(text: &str, column: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| RepoError::InvalidData(format!("invalid timestamp `{text}` in dos.{column}")))
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}
