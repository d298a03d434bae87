//! Core types shared by the store, the capabilities and the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unique identifier for a task
///
/// A UUIDv4 string assigned when the task is first created. Never changes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for compact tables and log lines
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Stored as TEXT
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Supported file-hosting services
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    /// pixeldrain.com, downloaded through its HTTP API
    Pixeldrain,
    /// buzzheavier.com / bzzhr.co, downloaded through an external tool
    Buzzheavier,
    /// bunkr mirrors, downloaded through an external tool
    Bunkr,
    /// Not recognized; never scheduled
    Unknown,
}

impl Host {
    /// Stored name of the host
    pub fn as_str(&self) -> &'static str {
        match self {
            Host::Pixeldrain => "pixeldrain",
            Host::Buzzheavier => "buzzheavier",
            Host::Bunkr => "bunkr",
            Host::Unknown => "unknown",
        }
    }

    /// Parse a stored host name. Anything unrecognized maps to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "pixeldrain" => Host::Pixeldrain,
            "buzzheavier" => Host::Buzzheavier,
            "bunkr" => Host::Bunkr,
            _ => Host::Unknown,
        }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task status
///
/// ```text
/// pending -> downloading -> extracting -> uploading -> done
///                 \               \             \
///                  +---------------+-------------+--> failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created or reset, waiting to run
    Pending,
    /// Host download in progress
    Downloading,
    /// Archive extraction in progress
    Extracting,
    /// Relocation to the destination in progress
    Uploading,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Every status, in pipeline order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Downloading,
        TaskStatus::Extracting,
        TaskStatus::Uploading,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    /// Stored name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    /// Parse a stored status name
    pub fn from_name(name: &str) -> Option<Self> {
        TaskStatus::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// `done` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Pending or any running phase; such tasks are resumed on the next run
    pub fn is_incomplete(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::from_name(s)
            .ok_or_else(|| crate::error::Error::InvalidInput(format!("unknown task status: {s}")))
    }
}

/// Pipeline phase within a single task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Fetch from the host
    Download,
    /// Unpack archives
    Extract,
    /// Relocate to the destination
    Upload,
    /// Remove scratch directories
    Cleanup,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Download => "download",
            Phase::Extract => "extract",
            Phase::Upload => "upload",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Archive type detected by extension or magic bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    /// RAR archive (.rar, .r00, .partN.rar)
    Rar,
    /// 7-Zip archive (.7z)
    SevenZip,
    /// ZIP archive (.zip)
    Zip,
}

/// Durable record of one URL's progress through the pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    /// Original link text; unique across the store
    pub url: String,
    /// Capability selector
    pub host: Host,
    /// Current status
    pub status: TaskStatus,
    /// Destination paths recorded after relocation
    pub output_paths: Vec<String>,
    /// Last failure message; present exactly when `status == Failed`
    pub error: Option<String>,
    /// Number of retry-triggered restarts
    pub retries: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Progress callback handed to capabilities: `(bytes_done, bytes_total)`
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// A progress callback that discards every report
pub fn no_progress() -> ProgressFn {
    Arc::new(|_, _| {})
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted by reconciliation and submitted to the pool
    TaskQueued {
        /// Task ID
        id: TaskId,
        /// Task URL
        url: String,
    },

    /// A task entered a phase
    PhaseStarted {
        /// Task ID
        id: TaskId,
        /// Phase entered
        phase: Phase,
    },

    /// Byte progress within a phase
    Progress {
        /// Task ID
        id: TaskId,
        /// Phase reporting progress
        phase: Phase,
        /// Bytes processed so far
        bytes_done: u64,
        /// Total bytes, when known
        bytes_total: Option<u64>,
    },

    /// Task reached `done`
    TaskCompleted {
        /// Task ID
        id: TaskId,
        /// Recorded destination paths
        output_paths: Vec<String>,
    },

    /// Task reached `failed`
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Failure message stored on the task
        error: String,
    },

    /// Overall counter: one more task reached a terminal status
    RunProgress {
        /// Tasks finished so far
        finished: usize,
        /// Tasks submitted in this run
        total: usize,
    },

    /// Shutdown was requested; no further tasks are submitted
    ShutdownRequested,
}
