use crate::types::ArchiveType;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

const ZIP_MAGIC: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const RAR_MAGIC: [&[u8]; 2] = [b"Rar!\x1a\x07\x00", b"Rar!\x1a\x07\x01\x00"];
const SEVEN_ZIP_MAGIC: [&[u8]; 1] = [b"7z\xbc\xaf\x27\x1c"];

/// Longest signature above
const HEADER_LEN: usize = 8;

#[allow(clippy::expect_used)]
static RAR_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.part(\d+)\.rar$").expect("static volume pattern must compile")
});
#[allow(clippy::expect_used)]
static RAR_OLD_VOLUME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.r\d{2}$").expect("static volume pattern must compile"));

/// Archive type from the file extension alone
pub fn archive_type_from_extension(path: &Path) -> Option<ArchiveType> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "rar" => Some(ArchiveType::Rar),
        "7z" => Some(ArchiveType::SevenZip),
        "zip" => Some(ArchiveType::Zip),
        _ => None,
    }
}

/// Archive type from leading signature bytes
pub fn archive_type_from_magic(header: &[u8]) -> Option<ArchiveType> {
    let matches = |sigs: &[&[u8]]| sigs.iter().any(|sig| header.starts_with(sig));
    if matches(&ZIP_MAGIC) {
        Some(ArchiveType::Zip)
    } else if matches(&RAR_MAGIC) {
        Some(ArchiveType::Rar)
    } else if matches(&SEVEN_ZIP_MAGIC) {
        Some(ArchiveType::SevenZip)
    } else {
        None
    }
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    std::fs::File::open(path)?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

/// Detect the archive type of a file
///
/// Signature bytes win over the extension, so a mislabelled archive is still
/// recognised. When the file cannot be read the extension decides.
pub fn detect_archive_type(path: &Path) -> Option<ArchiveType> {
    match read_header(path) {
        Ok(header) => archive_type_from_magic(&header).or_else(|| {
            // Extension says archive but bytes disagree: trust the bytes
            // unless the file is too short to carry a signature.
            archive_type_from_extension(path).filter(|_| header.len() < 4)
        }),
        Err(_) => archive_type_from_extension(path),
    }
}

/// True for rar volumes that are read through the first volume
///
/// `name.part2.rar` and later, and old-style `name.r00`, `name.r01`, ...
pub fn is_secondary_rar_volume(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if let Some(caps) = RAR_PART.captures(name) {
        return caps
            .get(1)
            .and_then(|n| n.as_str().parse::<u32>().ok())
            .is_some_and(|n| n > 1);
    }
    RAR_OLD_VOLUME.is_match(name)
}
