use super::*;
use std::path::Path;

/// Create a valid ZIP archive containing the given files
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

/// Create a valid 7z archive from a source directory using sevenz_rust
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

#[tokio::test]
async fn test_extract_zip() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("photos.zip");
    create_zip_archive(
        &archive,
        &[("one.jpg", b"first"), ("album/two.jpg", b"second")],
    );
    let dest = temp.path().join("out");

    let mut files = ArchiveExtractor::new()
        .extract(&archive, &dest, false)
        .await
        .unwrap();
    files.sort();

    assert_eq!(files, vec![dest.join("album/two.jpg"), dest.join("one.jpg")]);
    assert_eq!(std::fs::read(dest.join("album/two.jpg")).unwrap(), b"second");
    assert!(archive.exists(), "original kept when delete_original is false");
}

#[tokio::test]
async fn test_extract_deletes_original_on_success() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("data.zip");
    create_zip_archive(&archive, &[("a.txt", b"a")]);

    let files = ArchiveExtractor::new()
        .extract(&archive, &temp.path().join("out"), true)
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert!(!archive.exists());
}

#[tokio::test]
async fn test_zip_detected_by_signature_without_extension() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("download.bin");
    create_zip_archive(&archive, &[("inner.txt", b"inner")]);
    let dest = temp.path().join("out");

    let files = ArchiveExtractor::new()
        .extract(&archive, &dest, false)
        .await
        .unwrap();
    assert_eq!(files, vec![dest.join("inner.txt")]);
}

#[tokio::test]
async fn test_zip_entries_cannot_escape_destination() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("evil.zip");
    create_zip_archive(&archive, &[("../escape.txt", b"x"), ("ok.txt", b"y")]);
    let dest = temp.path().join("out");

    let files = ArchiveExtractor::new()
        .extract(&archive, &dest, false)
        .await
        .unwrap();

    assert_eq!(files, vec![dest.join("ok.txt")]);
    assert!(!temp.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_non_archive_is_copied() {
    let temp = tempfile::tempdir().unwrap();
    let video = temp.path().join("movie.mkv");
    std::fs::write(&video, b"not an archive").unwrap();
    let dest = temp.path().join("out");

    let files = ArchiveExtractor::new()
        .extract(&video, &dest, false)
        .await
        .unwrap();

    assert_eq!(files, vec![dest.join("movie.mkv")]);
    assert_eq!(std::fs::read(dest.join("movie.mkv")).unwrap(), b"not an archive");
    assert!(video.exists());
}

#[tokio::test]
async fn test_corrupt_archive_fails() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("broken.zip");
    // Valid signature, garbage afterwards
    std::fs::write(&archive, b"PK\x03\x04garbagegarbagegarbage").unwrap();

    let err = ArchiveExtractor::new()
        .extract(&archive, &temp.path().join("out"), true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PostProcess(PostProcessError::ExtractionFailed { .. })
    ));
    assert!(archive.exists(), "original kept when extraction fails");
}

#[tokio::test]
async fn test_missing_input_fails() {
    let temp = tempfile::tempdir().unwrap();
    let err = ArchiveExtractor::new()
        .extract(&temp.path().join("gone.zip"), &temp.path().join("out"), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PostProcess(PostProcessError::InvalidPath { .. })
    ));
}

#[tokio::test]
async fn test_secondary_rar_volume_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let volume = temp.path().join("movie.part2.rar");
    std::fs::write(&volume, b"Rar!\x1a\x07\x01\x00volume-two").unwrap();

    let files = ArchiveExtractor::new()
        .extract(&volume, &temp.path().join("out"), true)
        .await
        .unwrap();

    assert!(files.is_empty());
    assert!(volume.exists(), "skipped volumes are never deleted");
}

#[tokio::test]
async fn test_extract_7z() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("src");
    std::fs::create_dir_all(source.join("nested")).unwrap();
    std::fs::write(source.join("a.txt"), b"alpha").unwrap();
    std::fs::write(source.join("nested/b.txt"), b"beta").unwrap();
    let archive = temp.path().join("bundle.7z");
    create_7z_archive(&archive, &source);

    let dest = temp.path().join("out");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("previous.txt"), b"from another archive").unwrap();

    let files = ArchiveExtractor::new()
        .extract(&archive, &dest, false)
        .await
        .unwrap();

    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.starts_with(&dest)));
    assert!(!files.contains(&dest.join("previous.txt")));
    let names: Vec<_> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"a.txt".to_string()));
    assert!(names.contains(&"b.txt".to_string()));
}

#[test]
fn test_validate_extracted_paths_accepts_plain_tree() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("x/y")).unwrap();
    std::fs::write(temp.path().join("x/y/z.txt"), b"z").unwrap();
    SevenZipExtractor::validate_extracted_paths(Path::new("a.7z"), temp.path()).unwrap();
}

#[cfg(unix)]
#[test]
fn test_validate_extracted_paths_rejects_symlink_escape() {
    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().join("dest");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(temp.path().join("secret.txt"), b"s").unwrap();
    std::os::unix::fs::symlink(temp.path().join("secret.txt"), dest.join("link.txt")).unwrap();

    let err = SevenZipExtractor::validate_extracted_paths(Path::new("a.7z"), &dest).unwrap_err();
    assert!(matches!(
        err,
        Error::PostProcess(PostProcessError::InvalidPath { .. })
    ));
}
