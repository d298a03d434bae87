//! Working directory layout
//!
//! ```text
//! workdir/
//! ├── downloads/<task_id>/   raw host downloads
//! ├── extracted/<task_id>/   extraction output
//! ├── logs/                  log files
//! └── state.db               task store
//! ```
//!
//! Task ids are validated before they are ever joined onto a path, so a
//! crafted id cannot address anything outside the working root.

use crate::error::{Error, PostProcessError, Result};
use crate::utils::{collect_files, path_size};
use std::path::{Path, PathBuf};

/// Sequences a task id must never contain
const FORBIDDEN_ID_SEQUENCES: [&str; 4] = ["/", "\\", "..", "\0"];

/// Bytes used under each scratch directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// downloads/
    pub downloads: u64,
    /// extracted/
    pub extracted: u64,
    /// logs/
    pub logs: u64,
    /// Sum of the above
    pub total: u64,
}

/// Which per-task scratch tree to inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchArea {
    /// downloads/<task_id>
    Downloads,
    /// extracted/<task_id>
    Extracted,
}

/// Path-and-lifecycle helper for the working directory
#[derive(Debug, Clone)]
pub struct WorkdirLayout {
    root: PathBuf,
}

impl WorkdirLayout {
    /// Layout rooted at `root`; nothing is created until asked
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Working root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parent of every task download directory
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Parent of every task extraction directory
    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join("extracted")
    }

    /// Log directory
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Task store location
    pub fn state_db_path(&self) -> PathBuf {
        self.root.join("state.db")
    }

    /// Download directory of a task
    pub fn task_download_dir(&self, task_id: &str) -> Result<PathBuf> {
        validate_task_id(task_id)?;
        Ok(self.downloads_dir().join(task_id))
    }

    /// Extraction directory of a task
    pub fn task_extract_dir(&self, task_id: &str) -> Result<PathBuf> {
        validate_task_id(task_id)?;
        Ok(self.extracted_dir().join(task_id))
    }

    /// Create downloads/, extracted/ and logs/
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.downloads_dir(), self.extracted_dir(), self.logs_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Create both scratch directories of a task, returning `(download, extract)`
    pub async fn ensure_task_dirs(&self, task_id: &str) -> Result<(PathBuf, PathBuf)> {
        let download_dir = self.task_download_dir(task_id)?;
        let extract_dir = self.task_extract_dir(task_id)?;
        tokio::fs::create_dir_all(&download_dir).await?;
        tokio::fs::create_dir_all(&extract_dir).await?;
        Ok((download_dir, extract_dir))
    }

    /// Remove both scratch directories of a task; absent directories are fine
    pub async fn cleanup_task(&self, task_id: &str) -> Result<()> {
        for dir in [
            self.task_download_dir(task_id)?,
            self.task_extract_dir(task_id)?,
        ] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::PostProcess(PostProcessError::CleanupFailed {
                        id: task_id.to_string(),
                        reason: format!("{}: {}", dir.display(), e),
                    }));
                }
            }
        }
        tracing::debug!(task_id, "removed task scratch directories");
        Ok(())
    }

    /// Empty downloads/ and extracted/, keeping the directories themselves
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup_all_tasks(&self) -> Result<usize> {
        let mut removed = 0;
        for parent in [self.downloads_dir(), self.extracted_dir()] {
            let mut entries = match tokio::fs::read_dir(&parent).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    tokio::fs::remove_dir_all(entry.path()).await?;
                } else {
                    tokio::fs::remove_file(entry.path()).await?;
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every file currently under one of a task's scratch directories
    pub async fn task_files(&self, task_id: &str, area: ScratchArea) -> Result<Vec<PathBuf>> {
        let dir = match area {
            ScratchArea::Downloads => self.task_download_dir(task_id)?,
            ScratchArea::Extracted => self.task_extract_dir(task_id)?,
        };
        let files = tokio::task::spawn_blocking(move || collect_files(&dir))
            .await
            .map_err(|e| Error::Other(format!("file listing task panicked: {e}")))??;
        Ok(files)
    }

    /// Bytes used under downloads/, extracted/ and logs/
    pub async fn disk_usage(&self) -> Result<DiskUsage> {
        let dirs = [self.downloads_dir(), self.extracted_dir(), self.logs_dir()];
        let sizes = tokio::task::spawn_blocking(move || {
            dirs.map(|dir| if dir.exists() { path_size(&dir) } else { Ok(0) })
        })
        .await
        .map_err(|e| Error::Other(format!("disk usage task panicked: {e}")))?;

        let [downloads, extracted, logs] = sizes;
        let usage = DiskUsage {
            downloads: downloads?,
            extracted: extracted?,
            logs: logs?,
            total: 0,
        };
        Ok(DiskUsage {
            total: usage.downloads + usage.extracted + usage.logs,
            ..usage
        })
    }
}

/// Reject ids that are empty, blank, only dots, or could traverse out of a scratch directory
pub fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.is_empty() {
        return Err(Error::InvalidInput("task id cannot be empty".to_string()));
    }
    if task_id.trim().is_empty() {
        return Err(Error::InvalidInput(
            "task id cannot be whitespace only".to_string(),
        ));
    }
    // "." would resolve to the scratch root itself
    if task_id.chars().all(|c| c == '.') {
        return Err(Error::InvalidInput(
            "task id cannot consist only of dots".to_string(),
        ));
    }
    if let Some(seq) = FORBIDDEN_ID_SEQUENCES.iter().find(|s| task_id.contains(*s)) {
        return Err(Error::InvalidInput(format!(
            "task id contains invalid character or sequence: {seq:?}"
        )));
    }
    Ok(())
}
