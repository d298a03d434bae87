use crate::error::{Error, PostProcessError, Result};
use crate::utils::safe_join;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for RAR files (first volume of a set)
pub struct RarExtractor;

impl RarExtractor {
    fn convert_unrar_error(e: unrar::error::UnrarError, archive_path: &Path) -> Error {
        Error::PostProcess(PostProcessError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Extract every file of a RAR archive into `dest_path`
    ///
    /// Later volumes of a multi-part set are read through the first one and
    /// must sit next to it. Blocking; call through `spawn_blocking`.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting RAR extraction");

        std::fs::create_dir_all(dest_path)?;

        let mut at_header = unrar::Archive::new(archive_path)
            .open_for_processing()
            .map_err(|e| Self::convert_unrar_error(e, archive_path))?;

        let mut extracted_files = Vec::new();
        loop {
            let at_file = match at_header.read_header() {
                Ok(Some(entry_processor)) => entry_processor,
                Ok(None) => break,
                Err(e) => return Err(Self::convert_unrar_error(e, archive_path)),
            };

            let header = at_file.entry();
            let target = safe_join(dest_path, Path::new(&header.filename));

            match target {
                Some(file_path) if !header.is_directory() => {
                    if let Some(parent) = file_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    at_header = at_file
                        .extract_to(&file_path)
                        .map_err(|e| Self::convert_unrar_error(e, archive_path))?;
                    extracted_files.push(file_path);
                }
                target => {
                    if target.is_none() {
                        warn!(?archive_path, name = ?header.filename, "skipping entry with unsafe path");
                    }
                    at_header = at_file
                        .skip()
                        .map_err(|e| Self::convert_unrar_error(e, archive_path))?;
                }
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "RAR extraction successful"
        );
        Ok(extracted_files)
    }
}
