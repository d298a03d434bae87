use crate::error::{Error, PostProcessError, Result};
use crate::utils::collect_files;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Archive extractor for 7z files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Extract a 7z archive into `dest_path`
    ///
    /// The result is the set of files that appeared under `dest_path`, so
    /// other archives already extracted there are not reported again.
    /// Blocking; call through `spawn_blocking`.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting 7z extraction");

        std::fs::create_dir_all(dest_path)?;
        let before: HashSet<PathBuf> = collect_files(dest_path)?.into_iter().collect();

        sevenz_rust::decompress_file(archive_path, dest_path).map_err(|e| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to extract 7z archive: {}", e),
            })
        })?;

        Self::validate_extracted_paths(archive_path, dest_path)?;

        let extracted_files: Vec<PathBuf> = collect_files(dest_path)?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "7z extraction successful"
        );
        Ok(extracted_files)
    }

    /// Every entry under `dest_path` must resolve inside it
    pub(crate) fn validate_extracted_paths(archive_path: &Path, dest_path: &Path) -> Result<()> {
        let canonical_dest = dest_path.canonicalize()?;

        fn check_dir(dir: &Path, canonical_dest: &Path, archive_path: &Path) -> Result<()> {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                let canonical = path.canonicalize()?;

                if !canonical.starts_with(canonical_dest) {
                    return Err(Error::PostProcess(PostProcessError::InvalidPath {
                        path: canonical,
                        reason: format!(
                            "entry of {} resolves outside the extraction directory",
                            archive_path.display()
                        ),
                    }));
                }

                if path.is_dir() {
                    check_dir(&path, canonical_dest, archive_path)?;
                }
            }
            Ok(())
        }

        check_dir(dest_path, &canonical_dest, archive_path)
    }
}
