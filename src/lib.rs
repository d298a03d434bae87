//! # ingest-dl
//!
//! Resumable ingest pipeline for file-hosting links.
//!
//! Every link becomes a durably tracked task that moves through a fixed
//! sequence of phases: download from its host, extract archives, relocate the
//! results to a destination directory, then clean up scratch space. Progress
//! is recorded in a SQLite store inside the working directory, so an
//! interrupted run picks up where it stopped.
//!
//! ## Design
//!
//! - **Resumable** - each status transition is persisted before the next phase starts
//! - **Pluggable** - hosts, extraction and relocation are capability traits
//! - **Bounded** - a fixed-size worker pool, cooperative shutdown
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use ingest_dl::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         links_file: Some("links.txt".into()),
//!         destination: "/mnt/drive/ingest".into(),
//!         workdir: "/tmp/ingest-work".into(),
//!         ..Default::default()
//!     };
//!
//!     let orchestrator = Orchestrator::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = orchestrator.run().await?;
//!     println!("{}", outcome.stats.summary());
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Task store
pub mod db;
/// Error types
pub mod error;
/// Archive extraction capability
pub mod extraction;
/// Host download capabilities
pub mod hosts;
/// Link file parsing and host detection
pub mod links;
/// Task orchestration and the worker pool
pub mod orchestrator;
/// External process execution with streamed output
pub mod process;
/// Relocation capability
pub mod relocate;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Working directory layout
pub mod workdir;

// Re-export commonly used types
pub use config::{Config, PixeldrainConfig, RetryConfig, ToolsConfig};
pub use db::{Database, TaskStats};
pub use error::{DatabaseError, DownloadError, Error, PostProcessError, Result};
pub use extraction::{ArchiveExtractor, Extractor};
pub use hosts::{HostDownloader, HostRegistry, PixeldrainDownloader, ScriptDownloader};
pub use links::{ParsedLink, parse_links, parse_links_file};
pub use orchestrator::{Orchestrator, PlannedTask, RunOutcome, RunStatistics};
pub use relocate::{FsRelocator, Relocator};
pub use types::{Event, Host, Phase, ProgressFn, Task, TaskId, TaskStatus};
pub use workdir::WorkdirLayout;

/// Run the orchestrator, requesting a cooperative shutdown on the first
/// termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A second signal is not handled here; callers that want a hard exit can
/// keep listening themselves.
///
/// # Example
///
/// ```no_run
/// use ingest_dl::{Config, Orchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(Config::default()).await?;
///     let outcome = run_with_shutdown(&orchestrator).await?;
///     std::process::exit(outcome.exit_code());
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: &Orchestrator) -> Result<RunOutcome> {
    let watcher = orchestrator.clone();
    let signal_task = tokio::spawn(async move {
        wait_for_signal().await;
        watcher.shutdown();
    });

    let outcome = orchestrator.run().await;
    signal_task.abort();
    outcome
}

/// Wait for SIGINT or SIGTERM (Ctrl+C elsewhere)
///
/// Falls back to `tokio::signal::ctrl_c()` when the unix handlers cannot be
/// registered, as happens in some sandboxes.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, stopping after in-flight phases"),
                _ = sigint.recv() => tracing::info!("received SIGINT, stopping after in-flight phases"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register signal handlers, using ctrl_c");
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C, stopping after in-flight phases");
            }
        }
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
