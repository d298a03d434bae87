//! Host download capabilities
//!
//! Each supported host is served by one [`HostDownloader`]. The orchestrator
//! resolves the downloader once per task from the task's stored [`Host`]
//! through a [`HostRegistry`]; it never branches on host names itself.
//!
//! - [`pixeldrain`]: native HTTP client against the pixeldrain API
//! - [`script`]: external downloader tools for bunkr and buzzheavier

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Host, ProgressFn};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod pixeldrain;
pub mod script;

pub use pixeldrain::PixeldrainDownloader;
pub use script::ScriptDownloader;

/// Download capability for one host
///
/// Implementations must tolerate a pre-existing, partially filled
/// `dest_dir`: either resume or start over.
#[async_trait]
pub trait HostDownloader: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str;

    /// Fetch the resource behind `url` into `dest_dir`
    ///
    /// Returns every local file produced. An empty list is allowed here; the
    /// orchestrator treats it as a failed download.
    async fn download(&self, url: &str, dest_dir: &Path, progress: ProgressFn)
    -> Result<Vec<PathBuf>>;
}

/// Closed mapping from [`Host`] to its download capability
#[derive(Clone, Default)]
pub struct HostRegistry {
    downloaders: HashMap<Host, Arc<dyn HostDownloader>>,
}

impl HostRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the downloader for a host
    pub fn with(mut self, host: Host, downloader: Arc<dyn HostDownloader>) -> Self {
        self.downloaders.insert(host, downloader);
        self
    }

    /// Build the production registry from configuration
    ///
    /// Pixeldrain is always registered; bunkr and buzzheavier only when a
    /// command is configured for them.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry =
            Self::new().with(Host::Pixeldrain, Arc::new(PixeldrainDownloader::new(config)?));

        if let Some(command) = &config.tools.bunkr_command {
            registry = registry.with(
                Host::Bunkr,
                Arc::new(ScriptDownloader::new("bunkr", command.clone(), &config.tools)?),
            );
        }
        if let Some(command) = &config.tools.buzzheavier_command {
            registry = registry.with(
                Host::Buzzheavier,
                Arc::new(ScriptDownloader::new(
                    "buzzheavier",
                    command.clone(),
                    &config.tools,
                )?),
            );
        }
        Ok(registry)
    }

    /// The downloader for `host`
    pub fn get(&self, host: Host) -> Result<Arc<dyn HostDownloader>> {
        self.downloaders.get(&host).cloned().ok_or_else(|| {
            Error::NotSupported(format!("no downloader configured for host {host}"))
        })
    }

    /// True when `host` has a downloader
    pub fn supports(&self, host: Host) -> bool {
        self.downloaders.contains_key(&host)
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hosts: Vec<&str> = self.downloaders.keys().map(|h| h.as_str()).collect();
        hosts.sort_unstable();
        f.debug_struct("HostRegistry").field("hosts", &hosts).finish()
    }
}
