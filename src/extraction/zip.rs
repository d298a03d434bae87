use crate::error::{Error, PostProcessError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    fn failed(archive_path: &Path, reason: String) -> Error {
        Error::PostProcess(PostProcessError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason,
        })
    }

    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let Some(file_path) = file.enclosed_name().map(|p| dest_path.join(p)) else {
            warn!(?archive_path, name = file.name(), "skipping entry with unsafe path");
            return Ok(None);
        };

        if file.is_dir() {
            std::fs::create_dir_all(&file_path)?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&file_path)?;
        std::io::copy(&mut file, &mut outfile)
            .map_err(|e| Self::failed(archive_path, format!("failed to extract {}: {}", file_path.display(), e)))?;

        Ok(Some(file_path))
    }

    /// Extract every entry of a ZIP archive into `dest_path`
    ///
    /// Blocking; call through `spawn_blocking`.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        std::fs::create_dir_all(dest_path)?;
        let file = std::fs::File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Self::failed(archive_path, format!("failed to read ZIP archive: {}", e)))?;

        let mut extracted_files = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|e| {
                Self::failed(archive_path, format!("failed to read ZIP entry {}: {}", i, e))
            })?;
            if let Some(path) = Self::extract_entry(entry, dest_path, archive_path)? {
                extracted_files.push(path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );
        Ok(extracted_files)
    }
}
