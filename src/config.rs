//! Configuration types for ingest-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run configuration
///
/// Every field has a default so partially specified configurations deserialize
/// cleanly. The CLI fills this in from arguments and environment variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Text file with one link per line
    #[serde(default)]
    pub links_file: Option<PathBuf>,

    /// Durable destination that finished tasks are relocated into
    #[serde(default)]
    pub destination: PathBuf,

    /// Scratch root holding downloads/, extracted/, logs/ and state.db (default: /content/work)
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Number of tasks processed in parallel (default: 3)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Reset and re-run tasks that previously failed
    #[serde(default)]
    pub retry_failed: bool,

    /// Keep scratch directories after a task completes
    #[serde(default)]
    pub keep_temp: bool,

    /// Reconcile and report only, without running any phase
    #[serde(default)]
    pub dry_run: bool,

    /// Pixeldrain API settings
    #[serde(default)]
    pub pixeldrain: PixeldrainConfig,

    /// External downloader tools for script-driven hosts
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Backoff policy used inside the download capabilities
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            links_file: None,
            destination: PathBuf::new(),
            workdir: default_workdir(),
            concurrency: default_concurrency(),
            retry_failed: false,
            keep_temp: false,
            dry_run: false,
            pixeldrain: PixeldrainConfig::default(),
            tools: ToolsConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Path of the task database inside the workdir
    pub fn database_path(&self) -> PathBuf {
        self.workdir.join("state.db")
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency", "concurrency must be at least 1"));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(Error::config(
                "destination",
                "a destination directory is required",
            ));
        }
        if self.workdir.as_os_str().is_empty() {
            return Err(Error::config("workdir", "a working directory is required"));
        }
        Ok(())
    }

    /// Check that the link file exists and is a regular file
    pub fn require_links_file(&self) -> Result<&Path> {
        let path = self
            .links_file
            .as_deref()
            .ok_or_else(|| Error::config("links_file", "a links file is required"))?;
        if !path.is_file() {
            return Err(Error::InvalidInput(format!(
                "links file not found: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Pixeldrain API configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct PixeldrainConfig {
    /// API key, sent as the password of HTTP basic auth
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (default: https://pixeldrain.com/api)
    #[serde(default = "default_pixeldrain_api_base")]
    pub api_base: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for PixeldrainConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_pixeldrain_api_base(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for PixeldrainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixeldrainConfig")
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// External downloader commands
///
/// Commands are argument vectors. `{url}`, `{resource}` and `{dest}` inside
/// any argument are replaced with the task URL, the id (or normalized URL)
/// parsed from it, and its download directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Command used for bunkr links
    #[serde(default)]
    pub bunkr_command: Option<Vec<String>>,

    /// Command used for buzzheavier links
    #[serde(default)]
    pub buzzheavier_command: Option<Vec<String>>,

    /// Wall-clock limit per invocation (default: 30 minutes)
    #[serde(default = "default_tool_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Time between SIGTERM and a forced kill (default: 5 seconds)
    #[serde(default = "default_terminate_grace", with = "duration_serde")]
    pub terminate_grace: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bunkr_command: None,
            buzzheavier_command: None,
            timeout: default_tool_timeout(),
            terminate_grace: default_terminate_grace(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Mask a secret for display, keeping the first and last four characters
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/content/work")
}

fn default_concurrency() -> usize {
    3
}

fn default_pixeldrain_api_base() -> String {
    "https://pixeldrain.com/api".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_terminate_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
