//! FlowDo storage: one SQLite file holding the `dos` table.
//!
//! # Responsibility
//! - Open connections with foreign keys on and a busy timeout, so a second
//!   writer waits for a flow-up transaction instead of failing at once.
//! - Bring the `dos` schema to `migrations::latest_version()`.
//!
//! # Invariants
//! - `dos.time_unit` and `dos.do_type` only hold the snake_case names of
//!   `TimeUnit` and `DoType`; CHECK constraints reject anything else.
//! - `completed` is 0 or 1 and the three counters are never negative.
//! - Timestamps are RFC 3339 UTC text, so `ORDER BY created_at` is
//!   chronological.
//! - Schema version lives in `PRAGMA user_version`. A file written by a
//!   newer FlowDo is refused, not downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure opening or migrating the FlowDo database.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file's `user_version` is ahead of this build's migrations.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
