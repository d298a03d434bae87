//! Per-task state machine: download -> extract -> relocate -> cleanup
//!
//! A task resumes from its persisted status: `pending`/`downloading` start
//! with the download, `extracting` re-extracts what is still in the download
//! directory, `uploading` relocates what is still in the extract directory.
//! A phase saves the next status as soon as it succeeds, ahead of the
//! shutdown check, so finished work is never repeated after a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::error::{Error, Result};
use crate::types::{Event, Phase, Task, TaskId, TaskStatus};
use crate::workdir::ScratchArea;

/// How a worker left a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    /// Reached `done` with these recorded output paths
    Completed(Vec<String>),
    /// Reached `failed` with this message
    Failed(String),
    /// Stopped at a phase boundary because shutdown was requested
    Interrupted,
}

/// Why a phase did not hand over to the next one
enum Stop {
    /// Capability or resource failure; the task is marked failed
    Failed(String),
    /// Shutdown requested between phases
    Interrupted,
    /// Store failure; aborts the run
    Fatal(Error),
}

impl Stop {
    fn failed(e: impl std::fmt::Display) -> Self {
        Stop::Failed(e.to_string())
    }
}

impl From<Error> for Stop {
    fn from(e: Error) -> Self {
        Stop::Fatal(e)
    }
}

impl Orchestrator {
    /// Run one task on its own tokio task so a panic still fails it in the store
    pub(super) async fn run_worker(self, task: Task) -> Result<()> {
        let id = task.id.clone();
        let this = self.clone();
        match tokio::spawn(async move { this.process_task(task).await }).await {
            Ok(result) => result.map(|_| ()),
            Err(e) => {
                error!(task_id = %id, error = %e, "task worker panicked");
                let message = format!("worker panicked: {e}");
                self.progress.remove(&id);
                self.db
                    .update_status(&id, TaskStatus::Failed, Some(&message))
                    .await?;
                self.record_outcome(&id, &TaskOutcome::Failed(message)).await;
                Ok(())
            }
        }
    }

    /// Drive one task to a terminal status (or to a shutdown checkpoint)
    pub(crate) async fn process_task(&self, task: Task) -> Result<TaskOutcome> {
        let id = task.id.clone();
        info!(task_id = %id, url = %task.url, status = %task.status, "starting task");

        let outcome = match self.drive(&task).await {
            Ok(output_paths) => {
                self.db.update_status(&id, TaskStatus::Done, None).await?;
                info!(task_id = %id, outputs = output_paths.len(), "task completed");
                self.cleanup(&task).await;
                TaskOutcome::Completed(output_paths)
            }
            Err(Stop::Failed(message)) => {
                warn!(task_id = %id, url = %task.url, error = %message, "task failed");
                self.db
                    .update_status(&id, TaskStatus::Failed, Some(&message))
                    .await?;
                TaskOutcome::Failed(message)
            }
            Err(Stop::Interrupted) => {
                info!(task_id = %id, "task paused by shutdown, resumable on next run");
                TaskOutcome::Interrupted
            }
            Err(Stop::Fatal(e)) => {
                self.progress.remove(&id);
                return Err(e);
            }
        };

        self.progress.remove(&id);
        self.record_outcome(&id, &outcome).await;
        Ok(outcome)
    }

    async fn drive(&self, task: &Task) -> std::result::Result<Vec<String>, Stop> {
        let (download_dir, extract_dir) = self
            .layout
            .ensure_task_dirs(task.id.as_str())
            .await
            .map_err(Stop::failed)?;

        let downloaded = match task.status {
            TaskStatus::Pending | TaskStatus::Downloading => {
                self.checkpoint()?;
                Some(self.download_phase(task, &download_dir).await?)
            }
            TaskStatus::Extracting | TaskStatus::Uploading => None,
            TaskStatus::Done | TaskStatus::Failed => {
                return Err(Stop::Fatal(Error::InvalidInput(format!(
                    "task {} is already {}; reset it to run again",
                    task.id, task.status
                ))));
            }
        };

        let to_upload = match task.status {
            TaskStatus::Uploading => None,
            _ => {
                self.checkpoint()?;
                Some(self.extract_phase(task, downloaded, &extract_dir).await?)
            }
        };

        self.checkpoint()?;
        self.upload_phase(task, to_upload, &extract_dir).await
    }

    fn checkpoint(&self) -> std::result::Result<(), Stop> {
        if self.cancel.is_cancelled() {
            Err(Stop::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Persist the new status, then announce the phase
    async fn enter_phase(
        &self,
        task: &Task,
        status: TaskStatus,
        phase: Phase,
    ) -> std::result::Result<(), Stop> {
        self.db.update_status(&task.id, status, None).await?;
        self.progress.enter_phase(&task.id, phase);
        let _ = self.event_tx.send(Event::PhaseStarted {
            id: task.id.clone(),
            phase,
        });
        debug!(task_id = %task.id, %phase, "phase started");
        Ok(())
    }

    async fn download_phase(
        &self,
        task: &Task,
        download_dir: &Path,
    ) -> std::result::Result<Vec<PathBuf>, Stop> {
        self.enter_phase(task, TaskStatus::Downloading, Phase::Download)
            .await?;

        let downloader = self.hosts.get(task.host).map_err(Stop::failed)?;
        let progress =
            self.progress
                .reporter(task.id.clone(), Phase::Download, self.event_tx.clone());
        info!(task_id = %task.id, host = %task.host, downloader = downloader.name(), "downloading");

        let files = downloader
            .download(&task.url, download_dir, progress)
            .await
            .map_err(Stop::failed)?;
        if files.is_empty() {
            return Err(Stop::Failed("no files downloaded".to_string()));
        }

        let mut bytes = 0u64;
        for file in &files {
            match tokio::fs::metadata(file).await {
                Ok(metadata) => bytes += metadata.len(),
                Err(e) => debug!(task_id = %task.id, ?file, error = %e, "cannot size downloaded file"),
            }
        }
        self.stats.lock().await.bytes_downloaded += bytes;
        // Saved before any shutdown check so a restart never downloads again
        self.db
            .update_status(&task.id, TaskStatus::Extracting, None)
            .await?;
        info!(task_id = %task.id, files = files.len(), bytes, "download finished");
        Ok(files)
    }

    /// Extract every input; succeeds when at least one output exists
    ///
    /// `downloaded` is `None` when resuming an interrupted extraction: inputs
    /// are whatever is left in the download directory and earlier outputs are
    /// kept. A fresh extraction starts from an empty extract directory.
    async fn extract_phase(
        &self,
        task: &Task,
        downloaded: Option<Vec<PathBuf>>,
        extract_dir: &Path,
    ) -> std::result::Result<Vec<PathBuf>, Stop> {
        self.enter_phase(task, TaskStatus::Extracting, Phase::Extract)
            .await?;

        let (inputs, mut outputs) = match downloaded {
            Some(files) => {
                clear_dir(extract_dir).await.map_err(Stop::failed)?;
                (files, Vec::new())
            }
            None => {
                let inputs = self
                    .layout
                    .task_files(task.id.as_str(), ScratchArea::Downloads)
                    .await
                    .map_err(Stop::failed)?;
                let earlier = self
                    .layout
                    .task_files(task.id.as_str(), ScratchArea::Extracted)
                    .await
                    .map_err(Stop::failed)?;
                (inputs, earlier)
            }
        };

        let delete_original = !self.config.keep_temp;
        let mut failures = 0usize;
        let mut first_error = None;

        for input in &inputs {
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                warn!(task_id = %task.id, file = ?input, "downloaded file missing, skipping");
                continue;
            }
            match self
                .extractor
                .extract(input, extract_dir, delete_original)
                .await
            {
                Ok(files) => {
                    debug!(task_id = %task.id, file = ?input, outputs = files.len(), "extracted");
                    outputs.extend(files);
                }
                Err(e) => {
                    warn!(task_id = %task.id, file = ?input, error = %e, "extraction failed for file");
                    failures += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let mut seen = HashSet::new();
        outputs.retain(|path| seen.insert(path.clone()));

        if outputs.is_empty() {
            return Err(Stop::Failed(match first_error {
                Some(e) => format!("extraction failed: {e}"),
                None => "extraction produced no output".to_string(),
            }));
        }
        if failures > 0 {
            warn!(
                task_id = %task.id,
                failures,
                outputs = outputs.len(),
                "some files failed to extract, continuing with the rest"
            );
        }
        self.db
            .update_status(&task.id, TaskStatus::Uploading, None)
            .await?;
        info!(task_id = %task.id, outputs = outputs.len(), "extraction finished");
        Ok(outputs)
    }

    /// Relocate every output under `destination/<task_id>/`
    ///
    /// Each relocated path is appended to the task as soon as it lands, so a
    /// resumed upload keeps what an interrupted one already recorded.
    async fn upload_phase(
        &self,
        task: &Task,
        sources: Option<Vec<PathBuf>>,
        extract_dir: &Path,
    ) -> std::result::Result<Vec<String>, Stop> {
        self.enter_phase(task, TaskStatus::Uploading, Phase::Upload)
            .await?;

        let sources = match sources {
            Some(sources) => {
                self.db.set_output_paths(&task.id, &[]).await?;
                sources
            }
            None => self
                .layout
                .task_files(task.id.as_str(), ScratchArea::Extracted)
                .await
                .map_err(Stop::failed)?,
        };

        let task_dest = self.config.destination.join(task.id.as_str());
        let delete_source = !self.config.keep_temp;
        let progress = self
            .progress
            .reporter(task.id.clone(), Phase::Upload, self.event_tx.clone());
        let mut failures = 0usize;
        let mut first_error = None;

        for source in &sources {
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                warn!(task_id = %task.id, file = ?source, "output missing, skipping");
                continue;
            }
            let Some(name) = source.file_name() else {
                continue;
            };
            let dest_dir = source
                .strip_prefix(extract_dir)
                .ok()
                .and_then(Path::parent)
                .filter(|parent| !parent.as_os_str().is_empty())
                .map_or_else(|| task_dest.clone(), |parent| task_dest.join(parent));

            match self
                .relocator
                .relocate(source, &dest_dir, delete_source, progress.clone())
                .await
            {
                Ok(bytes) => {
                    let recorded = dest_dir.join(name).to_string_lossy().into_owned();
                    self.db.append_output_path(&task.id, &recorded).await?;
                    self.stats.lock().await.bytes_uploaded += bytes;
                    debug!(task_id = %task.id, path = %recorded, bytes, "relocated");
                }
                Err(e) => {
                    warn!(task_id = %task.id, file = ?source, error = %e, "relocation failed for file");
                    failures += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let recorded = self
            .db
            .get_task(&task.id)
            .await?
            .ok_or_else(|| Error::NotFound(task.id.to_string()))?
            .output_paths;

        if recorded.is_empty() {
            return Err(Stop::Failed(match first_error {
                Some(e) => format!("upload failed: {e}"),
                None => "no files to upload".to_string(),
            }));
        }
        if failures > 0 {
            warn!(
                task_id = %task.id,
                failures,
                uploaded = recorded.len(),
                "some files failed to relocate, continuing with the rest"
            );
        }
        info!(task_id = %task.id, outputs = recorded.len(), dest = %task_dest.display(), "upload finished");
        Ok(recorded)
    }

    /// Remove scratch directories after success; failures only warn
    async fn cleanup(&self, task: &Task) {
        if self.config.keep_temp {
            debug!(task_id = %task.id, "keeping scratch directories");
            return;
        }
        self.progress.enter_phase(&task.id, Phase::Cleanup);
        let _ = self.event_tx.send(Event::PhaseStarted {
            id: task.id.clone(),
            phase: Phase::Cleanup,
        });
        if let Err(e) = self.layout.cleanup_task(task.id.as_str()).await {
            warn!(task_id = %task.id, error = %e, "cleanup failed");
        }
    }

    /// Count a terminal outcome and publish it
    pub(crate) async fn record_outcome(&self, id: &TaskId, outcome: &TaskOutcome) {
        let event = match outcome {
            TaskOutcome::Completed(paths) => Event::TaskCompleted {
                id: id.clone(),
                output_paths: paths.clone(),
            },
            TaskOutcome::Failed(message) => Event::TaskFailed {
                id: id.clone(),
                error: message.clone(),
            },
            TaskOutcome::Interrupted => return,
        };

        let (finished, total) = {
            let mut stats = self.stats.lock().await;
            match outcome {
                TaskOutcome::Completed(_) => stats.completed += 1,
                _ => stats.failed += 1,
            }
            (stats.completed + stats.failed, stats.total)
        };

        let _ = self.event_tx.send(event);
        let _ = self.event_tx.send(Event::RunProgress { finished, total });
    }
}

/// Empty `dir`, keeping the directory itself
async fn clear_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
