//! Reconciliation of parsed links against the task store

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::error::{Error, Result};
use crate::links::{ParsedLink, validate_url};
use crate::types::{Task, TaskStatus};

impl Orchestrator {
    /// Decide which tasks this run processes, in link order
    ///
    /// - unknown hosts, and known hosts without a usable id, are dropped with
    ///   a warning
    /// - new URLs get a `pending` task
    /// - `done` tasks are skipped
    /// - `failed` tasks are reset (retry counter bumped) when retrying failed
    ///   tasks, skipped otherwise
    /// - anything else resumes as-is
    ///
    /// A URL listed twice is only scheduled once. Running this twice over the
    /// same links without progress in between selects the same tasks.
    pub async fn reconcile(&self, links: &[ParsedLink]) -> Result<Vec<Task>> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();

        for link in links {
            if let Err(e) = validate_url(&link.url) {
                warn!(url = %link.url, host = %link.host, error = %e, "skipping invalid link");
                continue;
            }
            if !seen.insert(link.url.as_str()) {
                debug!(url = %link.url, "duplicate link, already scheduled");
                continue;
            }

            let Some(existing) = self.db.get_task_by_url(&link.url).await? else {
                let task = self.db.create_task(&link.url, link.host).await?;
                debug!(task_id = %task.id, url = %task.url, "created task");
                tasks.push(task);
                continue;
            };

            match existing.status {
                TaskStatus::Done => {
                    debug!(task_id = %existing.id, url = %existing.url, "skipping completed task");
                    self.stats.lock().await.skipped += 1;
                }
                TaskStatus::Failed if self.config.retry_failed => {
                    self.db.reset_task(&existing.id).await?;
                    let retries = self.db.increment_retry(&existing.id).await?;
                    info!(
                        task_id = %existing.id,
                        url = %existing.url,
                        retries,
                        previous_error = existing.error.as_deref().unwrap_or_default(),
                        "retrying failed task"
                    );
                    let refreshed = self
                        .db
                        .get_task(&existing.id)
                        .await?
                        .ok_or_else(|| Error::NotFound(existing.id.to_string()))?;
                    tasks.push(refreshed);
                }
                TaskStatus::Failed => {
                    debug!(task_id = %existing.id, url = %existing.url, "skipping failed task");
                    self.stats.lock().await.skipped += 1;
                }
                status => {
                    debug!(task_id = %existing.id, %status, "resuming task");
                    tasks.push(existing);
                }
            }
        }

        Ok(tasks)
    }
}
