//! Task CRUD, status transitions, retry counters and output-path lists.

use crate::error::DatabaseError;
use crate::types::{Host, Task, TaskId, TaskStatus};
use crate::{Error, Result};

use super::{Database, TaskRow, TaskStats, now_millis};

const TASK_COLUMNS: &str =
    "id, url, host, status, output_paths, error, retries, created_at, updated_at";

/// Message stored when a task is failed without an explicit reason
const UNKNOWN_ERROR: &str = "unknown error";

impl Database {
    /// Create a task for `url`, or return the existing one
    ///
    /// The insert and the uniqueness check are one statement, so concurrent
    /// callers for the same URL all observe the same row.
    pub async fn create_task(&self, url: &str, host: Host) -> Result<Task> {
        let now = now_millis();
        let id = TaskId::generate();

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (id, url, host, status, output_paths, error, retries, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', '[]', NULL, 0, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(url)
        .bind(host.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        if result.rows_affected() > 0 {
            tracing::debug!(task_id = %id, url, host = %host, "created task");
        }

        self.get_task_by_url(url).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!(
                "task for {url} vanished after insert"
            )))
        })
    }

    /// Get a task by its URL
    pub async fn get_task_by_url(&self, url: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task by url: {}",
                e
            )))
        })?;

        row.map(Task::try_from).transpose()
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        row.map(Task::try_from).transpose()
    }

    /// List tasks with the given status, oldest first
    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.list_tasks_in(&[status]).await
    }

    /// List every task, oldest first
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, seq ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Tasks that have not reached a terminal status (pending or mid-pipeline)
    pub async fn list_incomplete_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks_in(&[
            TaskStatus::Pending,
            TaskStatus::Downloading,
            TaskStatus::Extracting,
            TaskStatus::Uploading,
        ])
        .await
    }

    /// Tasks waiting to run or that failed
    pub async fn list_pending_and_failed_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks_in(&[TaskStatus::Pending, TaskStatus::Failed])
            .await
    }

    async fn list_tasks_in(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ({placeholders}) ORDER BY created_at ASC, seq ASC"
        );

        let mut query = sqlx::query_as::<_, TaskRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks by status: {}",
                e
            )))
        })?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Move a task to `status`
    ///
    /// `error` is stored only for [`TaskStatus::Failed`] (falling back to a
    /// generic message when absent) and cleared for every other status.
    pub async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = match status {
            TaskStatus::Failed => Some(error.unwrap_or(UNKNOWN_ERROR)),
            _ => None,
        };

        let result = sqlx::query("UPDATE tasks SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update status: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Add `path` to the task's output list unless already present
    pub async fn append_output_path(&self, id: &TaskId, path: &str) -> Result<()> {
        // json_insert with '$[#]' appends; the NOT EXISTS guard gives set semantics
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET output_paths = json_insert(output_paths, '$[#]', ?), updated_at = ?
            WHERE id = ?
              AND NOT EXISTS (SELECT 1 FROM json_each(tasks.output_paths) WHERE json_each.value = ?)
            "#,
        )
        .bind(path)
        .bind(now_millis())
        .bind(id)
        .bind(path)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to append output path: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 && !self.task_exists(id).await? {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Replace the task's output list
    ///
    /// Duplicates in `paths` are dropped, keeping the first occurrence.
    pub async fn set_output_paths(&self, id: &TaskId, paths: &[String]) -> Result<()> {
        let mut unique: Vec<&str> = Vec::with_capacity(paths.len());
        for path in paths {
            if !unique.contains(&path.as_str()) {
                unique.push(path);
            }
        }
        let encoded = serde_json::to_string(&unique)?;

        let result = sqlx::query("UPDATE tasks SET output_paths = ?, updated_at = ? WHERE id = ?")
            .bind(encoded)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set output paths: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Increment the retry counter and return the new value
    pub async fn increment_retry(&self, id: &TaskId) -> Result<u32> {
        let retries: Option<i64> = sqlx::query_scalar(
            "UPDATE tasks SET retries = retries + 1, updated_at = ? WHERE id = ? RETURNING retries",
        )
        .bind(now_millis())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to increment retries: {}",
                e
            )))
        })?;

        let retries = retries.ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(u32::try_from(retries).unwrap_or(u32::MAX))
    }

    /// Put a task back to `pending`, clearing its error. Retries are kept.
    pub async fn reset_task(&self, id: &TaskId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset task: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Reset many tasks at once and return how many were reset
    ///
    /// With `only_failed` set, only failed tasks are touched; otherwise every
    /// task that is not already pending is.
    pub async fn reset_all_tasks(&self, only_failed: bool) -> Result<u64> {
        let sql = if only_failed {
            "UPDATE tasks SET status = 'pending', error = NULL, updated_at = ? WHERE status = 'failed'"
        } else {
            "UPDATE tasks SET status = 'pending', error = NULL, updated_at = ? WHERE status != 'pending'"
        };

        let result = sqlx::query(sql)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to reset tasks: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Delete a task; returns whether it existed
    pub async fn delete_task(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete task: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Count tasks per status
    pub async fn task_stats(&self) -> Result<TaskStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count tasks: {}",
                        e
                    )))
                })?;

        let mut stats = TaskStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            if let Some(status) = TaskStatus::from_name(&status) {
                *stats.slot(status) += count;
            }
            stats.total += count;
        }
        Ok(stats)
    }

    async fn task_exists(&self, id: &TaskId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check task: {}",
                    e
                )))
            })?;
        Ok(found.is_some())
    }
}
