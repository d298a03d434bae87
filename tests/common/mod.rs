//! Shared helpers for the ingest-dl integration tests
//!
//! A wiremock server stands in for the pixeldrain API so that whole runs go
//! through the production capabilities: HTTP download, native ZIP
//! extraction and filesystem relocation.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ingest_dl::{Config, Event};
use tempfile::TempDir;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Temporary workdir, destination and links file for one test
pub struct TestEnv {
    /// Keeps everything alive for the test's duration
    pub temp: TempDir,
}

impl TestEnv {
    /// Fresh empty environment
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// Scratch root
    pub fn workdir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    /// Destination root
    pub fn destination(&self) -> PathBuf {
        self.temp.path().join("drive")
    }

    /// Write a links file and return its path
    pub fn write_links(&self, lines: &[&str]) -> PathBuf {
        let path = self.temp.path().join("links.txt");
        std::fs::write(&path, lines.join("\n")).expect("failed to write links file");
        path
    }

    /// Run configuration pointed at `server` with fast, non-jittered retries
    pub fn config(&self, server: &MockServer, links: &Path) -> Config {
        let mut config = Config {
            links_file: Some(links.to_path_buf()),
            destination: self.destination(),
            workdir: self.workdir(),
            concurrency: 2,
            ..Default::default()
        };
        config.pixeldrain.api_base = server.uri();
        config.retry.max_attempts = 1;
        config.retry.initial_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(20);
        config.retry.jitter = false;
        config
    }
}

/// Build a stored (uncompressed) ZIP archive in memory
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).expect("start_file failed");
        writer.write_all(content).expect("write failed");
    }
    writer.finish().expect("finish failed").into_inner()
}

/// Serve one pixeldrain file: its info document and its content
pub async fn mount_file(server: &MockServer, id: &str, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/file/{id}/info")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": id,
            "name": name,
            "size": body.len(),
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/file/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Answer every request for `id` with 404
pub async fn mount_missing(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/file/{id}/info")))
        .respond_with(ResponseTemplate::new(404).set_body_string("file not found"))
        .mount(server)
        .await;
}

/// Pixeldrain share link for a file id
pub fn share_link(id: &str) -> String {
    format!("https://pixeldrain.com/u/{id}")
}

/// Every event already sitting in the channel
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Relative paths of every file under `root`, sorted
pub fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}
