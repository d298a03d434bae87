//! Archive extraction capability
//!
//! [`ArchiveExtractor`] turns one downloaded file into output files under a
//! task's extraction directory:
//! - ZIP, RAR and 7z archives are unpacked (type by signature, then extension)
//! - later volumes of a multi-part RAR set are skipped; the first volume
//!   reads them
//! - anything else is copied as-is
//!
//! Format decoding runs on the blocking pool.

mod detect;
mod rar;
mod sevenz;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use detect::{
    archive_type_from_extension, archive_type_from_magic, detect_archive_type,
    is_secondary_rar_volume,
};
pub use rar::RarExtractor;
pub use sevenz::SevenZipExtractor;
pub use zip::ZipExtractor;

use crate::error::{Error, PostProcessError, Result};
use crate::types::ArchiveType;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

/// Extraction capability
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Unpack (or copy) `file` into `dest_dir`
    ///
    /// Returns the output files. When `delete_original` is set the input is
    /// removed after a successful extraction.
    async fn extract(
        &self,
        file: &Path,
        dest_dir: &Path,
        delete_original: bool,
    ) -> Result<Vec<PathBuf>>;
}

/// Native ZIP / RAR / 7z extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Create an extractor
    pub fn new() -> Self {
        Self
    }

    async fn unpack(archive_type: ArchiveType, file: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let archive = file.to_path_buf();
        let dest = dest_dir.to_path_buf();
        spawn_blocking(move || match archive_type {
            ArchiveType::Zip => ZipExtractor::extract(&archive, &dest),
            ArchiveType::Rar => RarExtractor::extract(&archive, &dest),
            ArchiveType::SevenZip => SevenZipExtractor::extract(&archive, &dest),
        })
        .await
        .map_err(|e| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: file.to_path_buf(),
                reason: format!("extraction task panicked: {}", e),
            })
        })?
    }

    async fn copy_plain(file: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let name = file.file_name().ok_or_else(|| {
            Error::PostProcess(PostProcessError::InvalidPath {
                path: file.to_path_buf(),
                reason: "no file name".to_string(),
            })
        })?;
        let target = dest_dir.join(name);
        tokio::fs::copy(file, &target).await.map_err(|e| {
            Error::PostProcess(PostProcessError::MoveFailed {
                source_path: file.to_path_buf(),
                dest_path: target.clone(),
                reason: e.to_string(),
            })
        })?;
        debug!(?file, ?target, "copied non-archive file");
        Ok(vec![target])
    }
}

#[async_trait]
impl Extractor for ArchiveExtractor {
    async fn extract(
        &self,
        file: &Path,
        dest_dir: &Path,
        delete_original: bool,
    ) -> Result<Vec<PathBuf>> {
        let metadata = tokio::fs::metadata(file).await.map_err(|e| {
            Error::PostProcess(PostProcessError::InvalidPath {
                path: file.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
        if !metadata.is_file() {
            return Err(Error::PostProcess(PostProcessError::InvalidPath {
                path: file.to_path_buf(),
                reason: "not a regular file".to_string(),
            }));
        }

        if is_secondary_rar_volume(file) {
            debug!(?file, "skipping secondary rar volume");
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(dest_dir).await?;

        let archive_type = {
            let path = file.to_path_buf();
            spawn_blocking(move || detect_archive_type(&path))
                .await
                .map_err(|e| Error::Other(format!("archive detection task panicked: {e}")))?
        };

        let outputs = match archive_type {
            Some(archive_type) => {
                info!(?file, ?archive_type, "extracting archive");
                Self::unpack(archive_type, file, dest_dir).await?
            }
            None => Self::copy_plain(file, dest_dir).await?,
        };

        if delete_original && let Err(e) = tokio::fs::remove_file(file).await {
            warn!(?file, error = %e, "failed to delete original after extraction");
        }

        Ok(outputs)
    }
}
