//! Relocation capability
//!
//! Moves finished output from the scratch area into the durable destination.
//! A source may be a single file or a directory tree; it lands under
//! `dest_dir` with its own name.

use crate::error::{Error, PostProcessError, Result};
use crate::types::ProgressFn;
use crate::utils::{collect_files, path_size};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Relocation capability
#[async_trait]
pub trait Relocator: Send + Sync {
    /// Place `source` under `dest_dir`, returning the bytes moved
    async fn relocate(
        &self,
        source: &Path,
        dest_dir: &Path,
        delete_source: bool,
        progress: ProgressFn,
    ) -> Result<u64>;
}

/// Local filesystem relocator (buffered copy, rename when possible)
#[derive(Debug, Clone)]
pub struct FsRelocator {
    buffer_size: usize,
}

impl Default for FsRelocator {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

fn move_failed(source: &Path, dest: &Path, e: impl std::fmt::Display) -> Error {
    Error::PostProcess(PostProcessError::MoveFailed {
        source_path: source.to_path_buf(),
        dest_path: dest.to_path_buf(),
        reason: e.to_string(),
    })
}

impl FsRelocator {
    /// Relocator with the default 1 MiB copy buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Relocator with a custom copy buffer size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(4096),
        }
    }

    /// Rename `source` to `destination`; `false` when they are on different devices
    async fn try_rename(source: &Path, destination: &Path) -> std::io::Result<bool> {
        match fs::rename(source, destination).await {
            Ok(()) => Ok(true),
            Err(e)
                if e.kind() == std::io::ErrorKind::CrossesDevices
                    || e.raw_os_error() == Some(18) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        done_before: u64,
        total: u64,
        progress: &ProgressFn,
    ) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| move_failed(source, destination, e))?;
        }

        let source_file = File::open(source)
            .await
            .map_err(|e| move_failed(source, destination, e))?;
        let dest_file = File::create(destination)
            .await
            .map_err(|e| move_failed(source, destination, e))?;

        let mut reader = BufReader::with_capacity(self.buffer_size, source_file);
        let mut writer = BufWriter::with_capacity(self.buffer_size, dest_file);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut copied = 0u64;

        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| move_failed(source, destination, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| move_failed(source, destination, e))?;
            copied += n as u64;
            progress(done_before + copied, Some(total));
        }

        writer
            .flush()
            .await
            .map_err(|e| move_failed(source, destination, e))?;
        Ok(copied)
    }
}

#[async_trait]
impl Relocator for FsRelocator {
    async fn relocate(
        &self,
        source: &Path,
        dest_dir: &Path,
        delete_source: bool,
        progress: ProgressFn,
    ) -> Result<u64> {
        let metadata = fs::metadata(source)
            .await
            .map_err(|e| move_failed(source, dest_dir, e))?;
        let name = source.file_name().ok_or_else(|| {
            Error::PostProcess(PostProcessError::InvalidPath {
                path: source.to_path_buf(),
                reason: "no file name".to_string(),
            })
        })?;
        let target = dest_dir.join(name);

        let source_owned = source.to_path_buf();
        let (total, files) = tokio::task::spawn_blocking(move || -> std::io::Result<(u64, Vec<PathBuf>)> {
            let total = path_size(&source_owned)?;
            let files = if source_owned.is_dir() {
                collect_files(&source_owned)?
            } else {
                vec![source_owned.clone()]
            };
            Ok((total, files))
        })
        .await
        .map_err(|e| Error::Other(format!("relocation scan task panicked: {e}")))?
        .map_err(|e| move_failed(source, &target, e))?;

        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| move_failed(source, dest_dir, e))?;

        if delete_source && !fs::try_exists(&target).await.unwrap_or(false) {
            match Self::try_rename(source, &target).await {
                Ok(true) => {
                    tracing::debug!(?source, ?target, "relocated by rename");
                    progress(total, Some(total));
                    return Ok(total);
                }
                Ok(false) => {}
                Err(e) => return Err(move_failed(source, &target, e)),
            }
        }

        let mut moved = 0u64;
        for file in &files {
            let destination = if metadata.is_dir() {
                let relative = file
                    .strip_prefix(source)
                    .map_err(|e| move_failed(file, &target, e))?;
                target.join(relative)
            } else {
                target.clone()
            };
            moved += self
                .copy_file(file, &destination, moved, total, &progress)
                .await?;
        }
        if metadata.is_dir() {
            // Empty trees still produce the directory
            fs::create_dir_all(&target)
                .await
                .map_err(|e| move_failed(source, &target, e))?;
        }

        if delete_source {
            let removed = if metadata.is_dir() {
                fs::remove_dir_all(source).await
            } else {
                fs::remove_file(source).await
            };
            if let Err(e) = removed {
                tracing::warn!(?source, error = %e, "failed to remove relocated source");
            }
        }

        tracing::debug!(?source, ?target, bytes = moved, "relocated by copy");
        Ok(moved)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn recording() -> (ProgressFn, Arc<Mutex<Vec<(u64, Option<u64>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });
        (progress, seen)
    }

    #[tokio::test]
    async fn test_relocate_file_keeps_source() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("movie.mkv");
        std::fs::write(&source, vec![7u8; 10_000]).unwrap();
        let dest = temp.path().join("drive/task");
        let (progress, seen) = recording();

        let moved = FsRelocator::with_buffer_size(4096)
            .relocate(&source, &dest, false, progress)
            .await
            .unwrap();

        assert_eq!(moved, 10_000);
        assert!(source.exists());
        assert_eq!(std::fs::read(dest.join("movie.mkv")).unwrap().len(), 10_000);
        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 3, "progress reported per buffer");
        assert_eq!(seen.last(), Some(&(10_000, Some(10_000))));
    }

    #[tokio::test]
    async fn test_relocate_directory_tree_and_delete() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("album");
        std::fs::create_dir_all(source.join("disc1")).unwrap();
        std::fs::write(source.join("cover.jpg"), b"cover").unwrap();
        std::fs::write(source.join("disc1/01.flac"), b"track one").unwrap();
        let dest = temp.path().join("drive");

        let moved = FsRelocator::new()
            .relocate(&source, &dest, true, crate::types::no_progress())
            .await
            .unwrap();

        assert_eq!(moved, 14);
        assert!(!source.exists());
        assert_eq!(std::fs::read(dest.join("album/cover.jpg")).unwrap(), b"cover");
        assert_eq!(
            std::fs::read(dest.join("album/disc1/01.flac")).unwrap(),
            b"track one"
        );
    }

    #[tokio::test]
    async fn test_relocate_overwrites_previous_partial_copy() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("file.bin");
        std::fs::write(&source, b"complete content").unwrap();
        let dest = temp.path().join("drive");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("file.bin"), b"part").unwrap();

        let moved = FsRelocator::new()
            .relocate(&source, &dest, true, crate::types::no_progress())
            .await
            .unwrap();

        assert_eq!(moved, 16);
        assert_eq!(std::fs::read(dest.join("file.bin")).unwrap(), b"complete content");
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_move_failure() {
        let temp = tempfile::tempdir().unwrap();
        let err = FsRelocator::new()
            .relocate(
                &temp.path().join("nope"),
                &temp.path().join("drive"),
                false,
                crate::types::no_progress(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PostProcess(PostProcessError::MoveFailed { .. })
        ));
    }
}
