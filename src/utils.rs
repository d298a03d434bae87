//! Utility functions for file operations and path manipulation

use std::path::{Component, Path, PathBuf};

/// Recursively list regular files under `dir`, sorted
///
/// A missing directory yields an empty list.
pub fn collect_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    collect_into(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_into(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_into(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

/// Total size in bytes of the regular files under `path` (or of `path` itself)
pub fn path_size(path: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    let mut total = 0;
    for file in collect_files(path)? {
        total += std::fs::metadata(&file)?.len();
    }
    Ok(total)
}

/// Reduce a host-supplied file name to a single safe path component
///
/// Directory parts are stripped, leaving the final segment; names that are
/// empty or only dots become `fallback`.
#[must_use]
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .replace('\0', "")
        .trim()
        .to_string();

    if last.is_empty() || last.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        last
    }
}

/// Join an archive entry path onto `base`, refusing anything that escapes it
///
/// Absolute paths, drive prefixes and `..` components are rejected.
pub fn safe_join(base: &Path, entry: &Path) -> Option<PathBuf> {
    let mut joined = base.to_path_buf();
    let mut pushed = false;
    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    pushed.then_some(joined)
}
