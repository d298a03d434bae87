//! Link parsing
//!
//! Turns raw link-file lines into `(url, host, resource)` triples. Everything
//! here is a pure function of the input text: no network access, no state.
//!
//! The resource is the host's canonical handle for the link: a file or list id
//! for pixeldrain and buzzheavier, a normalized URL for bunkr, and the line
//! itself for unknown hosts.

use crate::error::{Error, Result};
use crate::types::Host;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

const BUNKR_SUBDOMAIN: &str = r"(?:(?:cdn\d*|media-files\d*|i\d*|stream|v|videos|player)\.)?";
const BUNKR_TLDS: &str = r"(?:si|su|la|ru|is|to|sk|ac|black|red|cat|ws|fi|ph|cr|site|media|click|se|cx|pk|ax|ps|org)";

/// Path prefixes bunkr uses for albums, files, videos, downloads and images
const BUNKR_TYPE_PREFIXES: [&str; 5] = ["/a/", "/f/", "/v/", "/d/", "/i/"];

// Literal patterns, exercised by the tests below
#[allow(clippy::expect_used)]
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static link pattern must compile")
}

static PIXELDRAIN_URL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)pixeldrain\.com/[ul]/([a-zA-Z0-9]+)"));
static PIXELDRAIN_LIST: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)pixeldrain\.com/l/"));
static RAW_PIXELDRAIN_ID: LazyLock<Regex> = LazyLock::new(|| pattern(r"^([a-zA-Z0-9]{8})$"));

static BUZZHEAVIER_URL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)buzzheavier\.com/f?/?([a-zA-Z0-9]+)"));
static BZZHR_URL: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)bzzhr\.co/([a-zA-Z0-9]+)"));
static RAW_BUZZHEAVIER_ID: LazyLock<Regex> = LazyLock::new(|| pattern(r"^([a-zA-Z0-9]{12})$"));

static BUNKR_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| pattern(&format!(r"(?i){BUNKR_SUBDOMAIN}bunkr{{1,3}}\.{BUNKR_TLDS}")));
static BUNKR_HOST_EXACT: LazyLock<Regex> =
    LazyLock::new(|| pattern(&format!(r"(?i)^{BUNKR_SUBDOMAIN}bunkr{{1,3}}\.{BUNKR_TLDS}$")));
static BUNKR_TYPED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"(?i){BUNKR_SUBDOMAIN}bunkr{{1,3}}\.{BUNKR_TLDS}/[afvdi]/([a-zA-Z0-9_-]+)"
    ))
});
static BUNKR_FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"(?i){BUNKR_SUBDOMAIN}bunkr{{1,3}}\.{BUNKR_TLDS}/([a-zA-Z0-9_-]+\.[a-zA-Z0-9]+)"
    ))
});

/// One usable line of a link file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    /// The trimmed line as written
    pub url: String,
    /// Detected host
    pub host: Host,
    /// Id or normalized URL the host capability works from
    pub resource: String,
}

/// Detect the hosting service a line refers to
///
/// Checked in order: pixeldrain, buzzheavier, bunkr domains, then bare ids
/// (8 characters for pixeldrain, 12 for buzzheavier).
pub fn detect_host(text: &str) -> Host {
    let text = text.trim();
    if text.is_empty() {
        return Host::Unknown;
    }

    let lower = text.to_lowercase();
    if lower.contains("pixeldrain") {
        Host::Pixeldrain
    } else if lower.contains("buzzheavier") || lower.contains("bzzhr.co") {
        Host::Buzzheavier
    } else if BUNKR_DOMAIN.is_match(&lower) {
        Host::Bunkr
    } else if RAW_PIXELDRAIN_ID.is_match(text) {
        Host::Pixeldrain
    } else if RAW_BUZZHEAVIER_ID.is_match(text) {
        Host::Buzzheavier
    } else {
        Host::Unknown
    }
}

fn first_capture(patterns: &[&Regex], text: &str) -> Option<String> {
    let text = text.trim();
    patterns
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// File or list id from a pixeldrain URL (`/u/<id>`, `/l/<id>`) or a bare id
pub fn pixeldrain_id(text: &str) -> Option<String> {
    first_capture(&[&PIXELDRAIN_URL, &RAW_PIXELDRAIN_ID], text)
}

/// True for pixeldrain list links (`/l/<id>`)
pub fn is_pixeldrain_list(text: &str) -> bool {
    PIXELDRAIN_LIST.is_match(text)
}

/// File id from a buzzheavier URL, a bzzhr.co short link or a bare id
pub fn buzzheavier_id(text: &str) -> Option<String> {
    first_capture(&[&BUZZHEAVIER_URL, &BZZHR_URL, &RAW_BUZZHEAVIER_ID], text)
}

/// Album or file slug from a bunkr URL
pub fn bunkr_id(text: &str) -> Option<String> {
    first_capture(&[&BUNKR_TYPED_PATH, &BUNKR_FILE_PATH], text)
}

/// Normalize a bunkr link
///
/// Adds an `https://` scheme when missing and rewrites a bare slug path to
/// the album form (`/a/<slug>`). Paths that already carry a type prefix, or
/// whose last segment looks like a file name, are kept. Links on other
/// domains are returned with only the scheme fixed.
pub fn normalize_bunkr_url(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return text.to_string();
    }

    let with_scheme = if text.starts_with("http://") || text.starts_with("https://") {
        text.to_string()
    } else {
        format!("https://{text}")
    };

    let Ok(parsed) = url::Url::parse(&with_scheme) else {
        return with_scheme;
    };
    let Some(host) = parsed.host_str() else {
        return with_scheme;
    };
    if !BUNKR_HOST_EXACT.is_match(host) {
        return with_scheme;
    }

    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut path = parsed.path().to_string();
    if path == "/" {
        path.clear();
    }

    if !path.is_empty() && !BUNKR_TYPE_PREFIXES.iter().any(|p| path.starts_with(p)) {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if let (Some(first), Some(last)) = (parts.first(), parts.last())
            && !first.is_empty()
            && !looks_like_file_name(last)
        {
            path = format!("/a/{first}");
        }
    }

    format!("https://{authority}{path}")
}

fn looks_like_file_name(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((_, ext)) => ext.len() <= 5,
        None => false,
    }
}

/// Parse a single line; `None` for blank lines and `#` comments
pub fn parse_line(line: &str) -> Option<ParsedLink> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let host = detect_host(line);
    let resource = match host {
        Host::Pixeldrain => pixeldrain_id(line),
        Host::Buzzheavier => buzzheavier_id(line),
        Host::Bunkr => Some(normalize_bunkr_url(line)),
        Host::Unknown => None,
    }
    .unwrap_or_else(|| line.to_string());

    Some(ParsedLink {
        url: line.to_string(),
        host,
        resource,
    })
}

/// Parse link-file contents, keeping input order
///
/// Unknown hosts are kept (with [`Host::Unknown`]) so callers can report them.
pub fn parse_links(contents: &str) -> Vec<ParsedLink> {
    contents.lines().filter_map(parse_line).collect()
}

/// Read and parse a UTF-8 link file
pub fn parse_links_file(path: &Path) -> Result<Vec<ParsedLink>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidInput(format!("cannot read links file {}: {}", path.display(), e))
    })?;
    Ok(parse_links(&contents))
}

/// Check that a line names a supported host and carries an extractable id
///
/// Bunkr links are checked in their normalized form, so a bare album slug
/// passes. The error message says what is wrong with the line.
pub fn validate_url(text: &str) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("URL is empty".to_string()));
    }

    let extracted = match detect_host(text) {
        Host::Unknown => {
            return Err(Error::InvalidInput(format!(
                "unsupported host for URL: {text}"
            )));
        }
        Host::Pixeldrain => pixeldrain_id(text),
        Host::Buzzheavier => buzzheavier_id(text),
        Host::Bunkr => bunkr_id(&normalize_bunkr_url(text)),
    };

    match extracted {
        Some(_) => Ok(()),
        None => Err(Error::InvalidInput(format!(
            "could not extract an id from: {text}"
        ))),
    }
}
