//! External-tool downloader for bunkr and buzzheavier
//!
//! These hosts are served by third-party downloader scripts. The command is
//! an argument vector from configuration in which these placeholders are
//! substituted per task:
//!
//! | placeholder  | value                                                  |
//! |--------------|--------------------------------------------------------|
//! | `{url}`      | the link as written in the links file                  |
//! | `{resource}` | buzzheavier file id, or the normalized bunkr URL       |
//! | `{dest}`     | the task download directory (also the working dir)    |
//!
//! The download directory belongs to a single task, so every complete file
//! under it is the result, including files an earlier, interrupted attempt
//! left behind. Partial transfers (`.part`, `.tmp`, ...) are ignored.

use crate::config::ToolsConfig;
use crate::error::{DownloadError, Result};
use crate::hosts::HostDownloader;
use crate::links::parse_line;
use crate::process::{Invocation, run_streaming};
use crate::types::ProgressFn;
use crate::utils::{collect_files, path_size};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output lines quoted in a failure message
const ERROR_TAIL_LINES: usize = 5;

/// Suffixes downloader tools use for transfers still in flight
const INCOMPLETE_SUFFIXES: [&str; 5] = [".part", ".tmp", ".temp", ".crdownload", ".aria2"];

fn is_incomplete(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|name| INCOMPLETE_SUFFIXES.iter().any(|s| name.ends_with(s)))
}

/// Downloader backed by an external command
#[derive(Debug, Clone)]
pub struct ScriptDownloader {
    name: String,
    command: Vec<String>,
    timeout: Duration,
    terminate_grace: Duration,
}

impl ScriptDownloader {
    /// Create a downloader named `name` running `command`
    pub fn new(name: &str, command: Vec<String>, tools: &ToolsConfig) -> Result<Self> {
        // Rejects an empty argument vector
        Invocation::from_argv(&command, tools.timeout, tools.terminate_grace)?;
        Ok(Self {
            name: name.to_string(),
            command,
            timeout: tools.timeout,
            terminate_grace: tools.terminate_grace,
        })
    }

    /// Program the command starts with
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// True when the program resolves on `PATH` or names an existing file
    pub fn is_available(&self) -> bool {
        let program = self.program();
        which::which(program).is_ok() || Path::new(program).is_file()
    }

    /// The process to run for one link
    pub fn build_invocation(&self, url: &str, dest_dir: &Path) -> Result<Invocation> {
        let resource = parse_line(url)
            .map(|link| link.resource)
            .unwrap_or_else(|| url.trim().to_string());
        let dest = dest_dir.to_string_lossy();

        let argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| {
                arg.replace("{url}", url.trim())
                    .replace("{resource}", &resource)
                    .replace("{dest}", &dest)
            })
            .collect();

        let mut invocation = Invocation::from_argv(&argv, self.timeout, self.terminate_grace)?;
        invocation.cwd = Some(dest_dir.to_path_buf());
        Ok(invocation)
    }
}

/// Complete files under `dir`, sorted
async fn complete_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_files(&dir))
        .await
        .map_err(|e| crate::error::Error::Other(format!("file listing task panicked: {e}")))??;
    Ok(files.into_iter().filter(|f| !is_incomplete(f)).collect())
}

#[async_trait]
impl HostDownloader for ScriptDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let earlier = complete_files(dest_dir).await?.len();
        let invocation = self.build_invocation(url, dest_dir)?;

        tracing::info!(downloader = %self.name, program = %invocation.program, url, "starting external downloader");
        let mut lines = 0u64;
        let outcome = run_streaming(&invocation, |_| lines += 1).await?;

        if outcome.timed_out {
            return Err(DownloadError::Timeout {
                seconds: self.timeout.as_secs(),
            }
            .into());
        }
        if !outcome.success {
            let tail = outcome.tail_text(ERROR_TAIL_LINES);
            let tail = if tail.is_empty() {
                tail
            } else {
                format!("\nLast output:\n{tail}")
            };
            return Err(DownloadError::ScriptFailed {
                code: outcome.code,
                tail,
            }
            .into());
        }

        let files = complete_files(dest_dir).await?;
        if earlier > 0 {
            tracing::info!(
                downloader = %self.name,
                reused = earlier,
                "keeping files from an earlier attempt"
            );
        }

        let bytes = files.iter().filter_map(|f| path_size(f).ok()).sum::<u64>();
        progress(bytes, Some(bytes));
        tracing::info!(
            downloader = %self.name,
            files = files.len(),
            bytes,
            output_lines = lines,
            "external downloader finished"
        );
        Ok(files)
    }
}
