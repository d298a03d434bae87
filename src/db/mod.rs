//! Database layer for ingest-dl
//!
//! Durable, crash-safe SQLite persistence for [`Task`] rows. This is the only
//! place persisted task state is mutated.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`tasks`]: Task CRUD, status transitions, counters and path lists
//!
//! Every mutation is a single SQL statement (or one transaction), so a crash
//! never leaves a half-applied update and concurrent writers to the same row
//! are serialized by SQLite itself.

use crate::error::DatabaseError;
use crate::types::{Host, Task, TaskId, TaskStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod tasks;

/// Task record as stored in the `tasks` table
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Task identifier (UUID string)
    pub id: String,
    /// Original link text
    pub url: String,
    /// Host name ("pixeldrain", "bunkr", ...)
    pub host: String,
    /// Status name ("pending", "done", ...)
    pub status: String,
    /// JSON array of destination paths
    pub output_paths: String,
    /// Last failure message
    pub error: Option<String>,
    /// Retry counter
    pub retries: i64,
    /// Creation time (Unix milliseconds)
    pub created_at: i64,
    /// Last mutation time (Unix milliseconds)
    pub updated_at: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = TaskStatus::from_name(&row.status).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "task {} has unknown status '{}'",
                row.id, row.status
            )))
        })?;
        let output_paths: Vec<String> = serde_json::from_str(&row.output_paths)?;

        Ok(Task {
            id: TaskId(row.id),
            url: row.url,
            host: Host::from_name(&row.host),
            status,
            output_paths,
            error: row.error,
            retries: u32::try_from(row.retries).unwrap_or(u32::MAX),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

/// Per-status task counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Tasks waiting to run
    pub pending: u64,
    /// Tasks in the download phase
    pub downloading: u64,
    /// Tasks in the extract phase
    pub extracting: u64,
    /// Tasks in the upload phase
    pub uploading: u64,
    /// Finished tasks
    pub done: u64,
    /// Failed tasks
    pub failed: u64,
    /// All rows in the store
    pub total: u64,
}

impl TaskStats {
    /// Count for one status
    pub fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Downloading => self.downloading,
            TaskStatus::Extracting => self.extracting,
            TaskStatus::Uploading => self.uploading,
            TaskStatus::Done => self.done,
            TaskStatus::Failed => self.failed,
        }
    }

    fn slot(&mut self, status: TaskStatus) -> &mut u64 {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Downloading => &mut self.downloading,
            TaskStatus::Extracting => &mut self.extracting,
            TaskStatus::Uploading => &mut self.uploading,
            TaskStatus::Done => &mut self.done,
            TaskStatus::Failed => &mut self.failed,
        }
    }

    /// `(status name, count)` pairs in pipeline order, zeros included
    pub fn entries(&self) -> Vec<(&'static str, u64)> {
        TaskStatus::ALL
            .into_iter()
            .map(|s| (s.as_str(), self.get(s)))
            .collect()
    }
}

/// Database handle for ingest-dl
pub struct Database {
    pool: SqlitePool,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
