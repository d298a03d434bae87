//! Run statistics and the run outcome

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::types::{Host, TaskId, TaskStatus};

/// Exit code when every processed task reached `done`
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when at least one task ended `failed`
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a user-requested interruption (128 + SIGINT)
pub const EXIT_INTERRUPTED: i32 = 130;

/// Aggregate counters for one run; never persisted
#[derive(Clone, Debug, Serialize)]
pub struct RunStatistics {
    /// Tasks selected by reconciliation
    pub total: usize,
    /// Tasks that reached `done` in this run
    pub completed: usize,
    /// Tasks that reached `failed` in this run
    pub failed: usize,
    /// Links skipped during reconciliation (done, or failed without retry)
    pub skipped: usize,
    /// Bytes fetched by the host capabilities
    pub bytes_downloaded: u64,
    /// Bytes moved by the relocation capability
    pub bytes_uploaded: u64,
    /// Run start
    pub start_time: DateTime<Utc>,
    /// Run end, set once the pool has drained
    pub end_time: Option<DateTime<Utc>>,
}

impl RunStatistics {
    pub(crate) fn start() -> Self {
        Self {
            total: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            bytes_downloaded: 0,
            bytes_uploaded: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Elapsed time in seconds, up to now for a run still in progress
    pub fn duration_secs(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// One-line human summary of the run
    pub fn summary(&self) -> String {
        format!(
            "Pipeline completed in {:.1}s: {} completed, {} failed, {} skipped. Downloaded: {} bytes, Uploaded: {} bytes",
            self.duration_secs(),
            self.completed,
            self.failed,
            self.skipped,
            self.bytes_downloaded,
            self.bytes_uploaded
        )
    }
}

/// What a dry run would have done for one task
#[derive(Clone, Debug, Serialize)]
pub struct PlannedTask {
    /// Task ID
    pub id: TaskId,
    /// Task URL
    pub url: String,
    /// Detected host
    pub host: Host,
    /// Status the task would resume from
    pub status: TaskStatus,
    /// Scratch directory for the download phase
    pub download_dir: PathBuf,
    /// Scratch directory for the extract phase
    pub extract_dir: PathBuf,
    /// Relocation target
    pub upload_dir: PathBuf,
}

/// Result of [`Orchestrator::run`](super::Orchestrator::run)
#[derive(Clone, Debug, Serialize)]
pub struct RunOutcome {
    /// Final statistics
    pub stats: RunStatistics,
    /// Shutdown was requested before the run finished
    pub interrupted: bool,
    /// Dry-run plan; empty for real runs
    pub planned: Vec<PlannedTask>,
}

impl RunOutcome {
    /// Process exit code: 130 when interrupted, 1 when any task failed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.stats.failed > 0 {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }
}
