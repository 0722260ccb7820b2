//! Do use-case service.
//!
//! # Responsibility
//! - Provide owner-scoped CRUD entry points for core callers.
//! - Record user completions, the only place `completion_count` grows.
//!
//! # Invariants
//! - A do owned by another user is reported as `NotFound`, never exposed.
//! - Service APIs never bypass repository validation.

use crate::model::do_item::{Do, DoId, DoType, TimeUnit, UserId};
use crate::repo::do_repo::{DoListQuery, DoRepository, RepoError, RepoResult};
use chrono::{DateTime, Utc};
use log::info;

/// Partial update applied by `DoService::update_do`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Manual move to another bucket; does not count as a flow.
    pub time_unit: Option<TimeUnit>,
}

/// Use-case service wrapper for do CRUD operations.
pub struct DoService<R: DoRepository> {
    repo: R,
}

impl<R: DoRepository> DoService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates an open do with zeroed counters.
    pub fn create_do(
        &self,
        user_id: UserId,
        title: impl Into<String>,
        time_unit: TimeUnit,
        do_type: DoType,
    ) -> RepoResult<Do> {
        let item = Do::new(user_id, title, time_unit, do_type, Utc::now());
        self.repo.create_do(&item)?;
        info!(
            "event=do_create module=service status=ok do_id={} time_unit={} do_type={}",
            item.id, item.time_unit, item.do_type
        );
        Ok(item)
    }

    /// Lists the owner's dos, oldest first, optionally for one bucket.
    pub fn list_dos(&self, user_id: UserId, time_unit: Option<TimeUnit>) -> RepoResult<Vec<Do>> {
        self.repo.list_dos(&DoListQuery {
            user_id: Some(user_id),
            time_unit,
            ..DoListQuery::default()
        })
    }

    /// Gets one of the owner's dos.
    pub fn get_do(&self, user_id: UserId, id: DoId) -> RepoResult<Do> {
        match self.repo.get_do(id)? {
            Some(item) if item.user_id == user_id => Ok(item),
            _ => Err(RepoError::NotFound(id)),
        }
    }

    /// Applies a partial update to one of the owner's dos.
    ///
    /// # Contract
    /// - `completed = true` without `completed_at` stamps the current time.
    /// - `completed = false` clears `completed_at`.
    /// - Moving `time_unit` by hand restarts `days_in_unit`.
    pub fn update_do(&self, user_id: UserId, id: DoId, patch: &DoPatch) -> RepoResult<Do> {
        let mut item = self.get_do(user_id, id)?;
        let now = Utc::now();

        if let Some(title) = &patch.title {
            item.title = title.clone();
        }

        match patch.completed {
            Some(true) => {
                item.completed = true;
                item.completed_at = Some(patch.completed_at.unwrap_or(now));
            }
            Some(false) => {
                item.completed = false;
                item.completed_at = None;
            }
            None => {
                if patch.completed_at.is_some() {
                    item.completed_at = patch.completed_at;
                }
            }
        }

        if let Some(time_unit) = patch.time_unit {
            if time_unit != item.time_unit {
                item.time_unit = time_unit;
                item.days_in_unit = 0;
            }
        }

        item.updated_at = now;
        self.repo.update_do(&item)?;
        Ok(item)
    }

    /// Marks one of the owner's dos completed at `at` and counts the completion.
    pub fn record_completion(
        &self,
        user_id: UserId,
        id: DoId,
        at: DateTime<Utc>,
    ) -> RepoResult<Do> {
        let mut item = self.get_do(user_id, id)?;
        item.completed = true;
        item.completed_at = Some(at);
        item.completion_count = item.completion_count.saturating_add(1);
        item.updated_at = at;
        self.repo.update_do(&item)?;
        info!(
            "event=do_complete module=service status=ok do_id={} completion_count={}",
            item.id, item.completion_count
        );
        Ok(item)
    }

    /// Deletes one of the owner's dos.
    pub fn delete_do(&self, user_id: UserId, id: DoId) -> RepoResult<()> {
        self.get_do(user_id, id)?;
        self.repo.delete_do(id)
    }
}
