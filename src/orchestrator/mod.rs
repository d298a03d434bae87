//! Task orchestration
//!
//! [`Orchestrator`] turns parsed links into tracked tasks and drives each one
//! through download, extract, relocate and cleanup on a bounded worker pool.
//! The work is split across focused submodules:
//! - [`reconcile`](self::reconcile) - links against the store, deciding what runs
//! - [`pipeline`](self::pipeline) - the per-task state machine
//! - [`progress`] - per-task progress registry
//! - [`stats`] - run statistics and exit codes
//!
//! Every status transition is written to the store before the next phase
//! starts. Shutdown is cooperative: no new task is submitted once the
//! cancellation token fires, and running tasks stop at their next phase
//! boundary, staying resumable.

mod pipeline;
pub mod progress;
mod reconcile;
pub mod stats;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use progress::{ProgressRegistry, TaskProgress};
pub use stats::{
    EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS, PlannedTask, RunOutcome, RunStatistics,
};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::extraction::{ArchiveExtractor, Extractor};
use crate::hosts::HostRegistry;
use crate::links::{ParsedLink, parse_links_file};
use crate::relocate::{FsRelocator, Relocator};
use crate::types::{Event, Task};
use crate::workdir::WorkdirLayout;

/// Capacity of the event channel; slow subscribers lag rather than block workers
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Pipeline orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Task store; public so callers can inspect task state after a run
    pub db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) layout: WorkdirLayout,
    pub(crate) hosts: Arc<HostRegistry>,
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) relocator: Arc<dyn Relocator>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: Arc<Mutex<RunStatistics>>,
    pub(crate) progress: ProgressRegistry,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workdir", &self.layout.root())
            .field("destination", &self.config.destination)
            .field("concurrency", &self.config.concurrency)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator with the built-in capabilities
    ///
    /// Validates the configuration, creates the working directory layout and
    /// opens (or creates) `workdir/state.db`.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let layout = WorkdirLayout::new(&config.workdir);
        layout.ensure_dirs().await?;
        let db = Database::new(&layout.state_db_path()).await?;
        let hosts = HostRegistry::from_config(&config)?;

        Ok(Self::from_parts(
            config,
            db,
            hosts,
            Arc::new(ArchiveExtractor::new()),
            Arc::new(FsRelocator::new()),
        ))
    }

    /// Assemble an orchestrator from explicit capabilities
    pub fn from_parts(
        config: Config,
        db: Database,
        hosts: HostRegistry,
        extractor: Arc<dyn Extractor>,
        relocator: Arc<dyn Relocator>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let layout = WorkdirLayout::new(&config.workdir);

        Self {
            db: Arc::new(db),
            config: Arc::new(config),
            layout,
            hosts: Arc::new(hosts),
            extractor,
            relocator,
            event_tx,
            cancel: CancellationToken::new(),
            stats: Arc::new(Mutex::new(RunStatistics::start())),
            progress: ProgressRegistry::new(),
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a cooperative shutdown
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("shutdown requested, finishing running phases");
            self.cancel.cancel();
            let _ = self.event_tx.send(Event::ShutdownRequested);
        }
    }

    /// Working directory layout in use
    pub fn layout(&self) -> &WorkdirLayout {
        &self.layout
    }

    /// Progress of the tasks currently running
    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    /// Snapshot of the current run's statistics
    pub async fn statistics(&self) -> RunStatistics {
        self.stats.lock().await.clone()
    }

    /// Run the pipeline over the configured links file
    pub async fn run(&self) -> Result<RunOutcome> {
        let links_file = self.config.require_links_file()?;
        info!(links_file = %links_file.display(), "loading tasks");
        let links = parse_links_file(links_file)?;
        self.run_links(&links).await
    }

    /// Run the pipeline over already parsed links
    ///
    /// Reconciles `links` against the store, then either executes every
    /// selected task or, in dry-run mode, only reports what would run.
    pub async fn run_links(&self, links: &[ParsedLink]) -> Result<RunOutcome> {
        *self.stats.lock().await = RunStatistics::start();
        self.layout.ensure_dirs().await?;

        let tasks = self.reconcile(links).await?;
        self.stats.lock().await.total = tasks.len();

        let planned = if tasks.is_empty() {
            info!("no tasks to process");
            Vec::new()
        } else if self.config.dry_run {
            self.plan(&tasks)?
        } else {
            info!(count = tasks.len(), "processing tasks");
            self.execute(tasks).await?;
            Vec::new()
        };

        let stats = {
            let mut stats = self.stats.lock().await;
            stats.end_time = Some(Utc::now());
            stats.clone()
        };
        info!("{}", stats.summary());

        Ok(RunOutcome {
            stats,
            interrupted: self.cancel.is_cancelled(),
            planned,
        })
    }

    /// Describe each task without running any phase
    fn plan(&self, tasks: &[Task]) -> Result<Vec<PlannedTask>> {
        info!("dry run: no phase will execute");
        let planned = tasks
            .iter()
            .map(|task| {
                let plan = PlannedTask {
                    id: task.id.clone(),
                    url: task.url.clone(),
                    host: task.host,
                    status: task.status,
                    download_dir: self.layout.task_download_dir(task.id.as_str())?,
                    extract_dir: self.layout.task_extract_dir(task.id.as_str())?,
                    upload_dir: self.config.destination.join(task.id.as_str()),
                };
                info!(
                    task_id = %plan.id,
                    url = %plan.url,
                    host = %plan.host,
                    status = %plan.status,
                    download_dir = %plan.download_dir.display(),
                    extract_dir = %plan.extract_dir.display(),
                    upload_dir = %plan.upload_dir.display(),
                    "would process"
                );
                Ok(plan)
            })
            .collect::<Result<Vec<_>>>()?;
        info!(count = planned.len(), "dry run complete");
        Ok(planned)
    }

    /// Submit tasks in order to the worker pool and wait for them
    ///
    /// A store failure inside a worker is fatal: the run is cancelled and the
    /// first such error returned once in-flight tasks have stopped.
    async fn execute(&self, tasks: Vec<Task>) -> Result<()> {
        let limit = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers = JoinSet::new();

        for task in tasks {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let _ = self.event_tx.send(Event::TaskQueued {
                id: task.id.clone(),
                url: task.url.clone(),
            });

            let this = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                this.run_worker(task).await
            });
        }

        if self.cancel.is_cancelled() {
            info!(
                in_flight = workers.len(),
                "submission stopped, waiting for running tasks"
            );
        }

        let mut fatal: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "state store failure, stopping run");
                    self.cancel.cancel();
                    fatal.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "worker task aborted"),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
