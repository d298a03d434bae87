//! Pixeldrain downloader
//!
//! Talks to the pixeldrain HTTP API directly:
//! - `GET {api_base}/file/{id}/info` for the name and size
//! - `GET {api_base}/file/{id}` for the content, resumed with `Range`
//! - `GET {api_base}/list/{id}` to expand `/l/` list links
//!
//! Authentication is HTTP basic auth with an empty user and the API key as
//! the password. Content is written to `<name>.part` and renamed once the
//! size matches the advertised size.

use crate::config::{Config, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::hosts::HostDownloader;
use crate::links::{is_pixeldrain_list, pixeldrain_id};
use crate::retry::download_with_retry;
use crate::types::ProgressFn;
use crate::utils::sanitize_file_name;
use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const PART_SUFFIX: &str = ".part";

/// File metadata returned by the info endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    /// File id (absent from some responses; filled in from the request)
    #[serde(default)]
    pub id: String,
    /// Original file name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct ListInfo {
    #[serde(default)]
    files: Vec<FileInfo>,
}

/// HTTP downloader for pixeldrain links
pub struct PixeldrainDownloader {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    read_timeout: Duration,
    retry: RetryConfig,
}

impl PixeldrainDownloader {
    /// Build a downloader from the run configuration
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.pixeldrain.request_timeout)
            .user_agent(concat!("ingest-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        if config.pixeldrain.api_key.is_none() {
            tracing::debug!("no pixeldrain API key configured, requests are anonymous");
        }

        Ok(Self {
            client,
            api_base: config.pixeldrain.api_base.trim_end_matches('/').to_string(),
            api_key: config.pixeldrain.api_key.clone(),
            read_timeout: config.pixeldrain.request_timeout,
            retry: config.retry.clone(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.basic_auth("", Some(key)),
            None => request,
        }
    }

    /// Map a non-success response to a [`DownloadError`]
    async fn check(response: reqwest::Response, id: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.to_string()
        } else {
            body.trim().to_string()
        };

        let err = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                DownloadError::Auth(format!("{id}: {message}"))
            }
            StatusCode::NOT_FOUND => DownloadError::NotFound(id.to_string()),
            StatusCode::TOO_MANY_REQUESTS => DownloadError::RateLimited { retry_after },
            _ => DownloadError::Http {
                status: status.as_u16(),
                message,
            },
        };
        Err(err.into())
    }

    /// Name and size of a file
    pub async fn file_info(&self, id: &str) -> Result<FileInfo> {
        let url = format!("{}/file/{}/info", self.api_base, id);
        let (this, url) = (self, url.as_str());
        let mut info: FileInfo = download_with_retry(&self.retry, move || async move {
            let response = this.get(url).send().await?;
            let response = Self::check(response, id).await?;
            Ok::<_, Error>(response.json::<FileInfo>().await?)
        })
        .await?;

        if info.id.is_empty() {
            info.id = id.to_string();
        }
        Ok(info)
    }

    /// Files contained in a list
    pub async fn list_files(&self, list_id: &str) -> Result<Vec<FileInfo>> {
        let url = format!("{}/list/{}", self.api_base, list_id);
        let (this, url) = (self, url.as_str());
        let list: ListInfo = download_with_retry(&self.retry, move || async move {
            let response = this.get(url).send().await?;
            let response = Self::check(response, list_id).await?;
            Ok::<_, Error>(response.json::<ListInfo>().await?)
        })
        .await?;
        Ok(list.files)
    }

    /// Download one file into `dest_dir`, resuming a previous `.part`
    pub async fn download_file(
        &self,
        info: &FileInfo,
        dest_dir: &Path,
        progress: &ProgressFn,
    ) -> Result<PathBuf> {
        let name = sanitize_file_name(&info.name, &info.id);
        let final_path = dest_dir.join(&name);
        let part_path = dest_dir.join(format!("{name}{PART_SUFFIX}"));

        if let Ok(meta) = tokio::fs::metadata(&final_path).await
            && meta.len() == info.size
        {
            tracing::info!(file = %name, "already downloaded, skipping");
            progress(info.size, Some(info.size));
            return Ok(final_path);
        }

        let (this, part) = (self, part_path.as_path());
        download_with_retry(&self.retry, move || async move {
            this.fetch_once(info, part, progress).await
        })
        .await?;

        tokio::fs::rename(&part_path, &final_path).await?;
        tracing::info!(file = %name, bytes = info.size, "download complete");
        Ok(final_path)
    }

    /// One transfer attempt into `part`
    async fn fetch_once(&self, info: &FileInfo, part: &Path, progress: &ProgressFn) -> Result<()> {
        let mut existing = match tokio::fs::metadata(part).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if existing > info.size {
            tracing::warn!(path = ?part, existing, expected = info.size, "partial file larger than expected, restarting");
            tokio::fs::remove_file(part).await?;
            existing = 0;
        }
        if existing == info.size && existing > 0 {
            progress(existing, Some(info.size));
            return Ok(());
        }

        let url = format!("{}/file/{}", self.api_base, info.id);
        let mut request = self.get(&url);
        if existing > 0 {
            tracing::info!(file = %info.name, existing, total = info.size, "resuming partial download");
            request = request.header(header::RANGE, format!("bytes={existing}-"));
        }
        let mut response = Self::check(request.send().await?, &info.id).await?;

        // 206 continues the partial file; anything else restarts it
        let resumed = existing > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        let mut file = if resumed {
            tokio::fs::OpenOptions::new().append(true).open(part).await?
        } else {
            tokio::fs::File::create(part).await?
        };
        let mut done = if resumed { existing } else { 0 };
        progress(done, Some(info.size));

        loop {
            let chunk = tokio::time::timeout(self.read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no data received for {}s", self.read_timeout.as_secs()),
                    )
                })??;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            done += chunk.len() as u64;
            progress(done, Some(info.size));
        }
        file.flush().await?;
        drop(file);

        let actual = tokio::fs::metadata(part).await?.len();
        if actual != info.size {
            return Err(DownloadError::SizeMismatch {
                expected: info.size,
                actual,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl HostDownloader for PixeldrainDownloader {
    fn name(&self) -> &str {
        "pixeldrain"
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn,
    ) -> Result<Vec<PathBuf>> {
        let id = pixeldrain_id(url).ok_or_else(|| {
            Error::InvalidInput(format!("could not extract a pixeldrain id from: {url}"))
        })?;
        tokio::fs::create_dir_all(dest_dir).await?;

        if is_pixeldrain_list(url) {
            let files = self.list_files(&id).await?;
            tracing::info!(list_id = %id, files = files.len(), "downloading pixeldrain list");
            let mut paths = Vec::with_capacity(files.len());
            for info in &files {
                paths.push(self.download_file(info, dest_dir, &progress).await?);
            }
            return Ok(paths);
        }

        let info = self.file_info(&id).await?;
        tracing::info!(file_id = %id, name = %info.name, size = info.size, "downloading pixeldrain file");
        Ok(vec![self.download_file(&info, dest_dir, &progress).await?])
    }
}
