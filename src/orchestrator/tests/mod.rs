use super::*;
use crate::error::PostProcessError;
use crate::hosts::HostDownloader;
use crate::types::{Host, Phase, ProgressFn, TaskStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mod reconcile;

/// Host capability that writes fixed files and counts calls
#[derive(Default)]
pub(crate) struct MockDownloader {
    files: Vec<(String, Vec<u8>)>,
    error: Option<String>,
    delay: Duration,
    pub(crate) calls: AtomicUsize,
    active: AtomicUsize,
    pub(crate) max_active: AtomicUsize,
}

impl MockDownloader {
    pub(crate) fn with_files(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl HostDownloader for MockDownloader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download(
        &self,
        _url: &str,
        dest_dir: &Path,
        progress: ProgressFn,
    ) -> crate::Result<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.error {
            return Err(Error::Other(message.clone()));
        }

        let mut paths = Vec::new();
        let mut total = 0u64;
        for (name, content) in &self.files {
            let path = dest_dir.join(name);
            tokio::fs::write(&path, content).await?;
            total += content.len() as u64;
            paths.push(path);
        }
        progress(total, Some(total));
        Ok(paths)
    }
}

/// Host capability with a bug: it panics instead of returning
pub(crate) struct PanickingDownloader;

#[async_trait]
impl HostDownloader for PanickingDownloader {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn download(
        &self,
        _url: &str,
        _dest_dir: &Path,
        _progress: ProgressFn,
    ) -> crate::Result<Vec<PathBuf>> {
        panic!("index out of range in segment table");
    }
}

/// Extraction capability that copies inputs and fails on names containing "corrupt"
#[derive(Default)]
pub(crate) struct MockExtractor {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        file: &Path,
        dest_dir: &Path,
        delete_original: bool,
    ) -> crate::Result<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = file.file_name().unwrap();
        if name.to_string_lossy().contains("corrupt") {
            return Err(Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: file.to_path_buf(),
                reason: "bad header".to_string(),
            }));
        }
        let target = dest_dir.join(name);
        tokio::fs::copy(file, &target).await?;
        if delete_original {
            tokio::fs::remove_file(file).await?;
        }
        Ok(vec![target])
    }
}

/// Relocation capability that always fails
pub(crate) struct FailingRelocator;

#[async_trait]
impl Relocator for FailingRelocator {
    async fn relocate(
        &self,
        source: &Path,
        dest_dir: &Path,
        _delete_source: bool,
        _progress: ProgressFn,
    ) -> crate::Result<u64> {
        Err(Error::PostProcess(PostProcessError::MoveFailed {
            source_path: source.to_path_buf(),
            dest_path: dest_dir.to_path_buf(),
            reason: "destination unavailable".to_string(),
        }))
    }
}

/// Relocates normally, then swaps the extract directory for a plain file so
/// that removing it afterwards fails
pub(crate) struct UnremovableScratchRelocator;

#[async_trait]
impl Relocator for UnremovableScratchRelocator {
    async fn relocate(
        &self,
        source: &Path,
        dest_dir: &Path,
        delete_source: bool,
        progress: ProgressFn,
    ) -> crate::Result<u64> {
        let bytes = FsRelocator::new()
            .relocate(source, dest_dir, delete_source, progress)
            .await?;
        let extract_dir = source.parent().unwrap();
        tokio::fs::remove_dir_all(extract_dir).await?;
        tokio::fs::write(extract_dir, b"not a directory").await?;
        Ok(bytes)
    }
}

/// Orchestrator over a temporary workdir with mock capabilities
pub(crate) struct Harness {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) downloader: Arc<MockDownloader>,
    pub(crate) extractor: Arc<MockExtractor>,
    pub(crate) temp: tempfile::TempDir,
}

impl Harness {
    pub(crate) fn destination(&self) -> PathBuf {
        self.temp.path().join("drive")
    }
}

pub(crate) async fn harness_with(
    downloader: MockDownloader,
    relocator: Arc<dyn Relocator>,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config {
        workdir: temp.path().join("work"),
        destination: temp.path().join("drive"),
        concurrency: 2,
        ..Default::default()
    };
    configure(&mut config);
    std::fs::create_dir_all(&config.workdir).unwrap();

    let db = Database::new(&config.database_path()).await.unwrap();
    let downloader = Arc::new(downloader);
    let extractor = Arc::new(MockExtractor::default());
    let hosts = HostRegistry::new()
        .with(Host::Pixeldrain, downloader.clone())
        .with(Host::Buzzheavier, downloader.clone());

    let orchestrator = Orchestrator::from_parts(config, db, hosts, extractor.clone(), relocator);
    Harness {
        orchestrator,
        downloader,
        extractor,
        temp,
    }
}

pub(crate) async fn harness(downloader: MockDownloader) -> Harness {
    harness_with(downloader, Arc::new(FsRelocator::new()), |_| {}).await
}

pub(crate) fn pixeldrain(id: &str) -> ParsedLink {
    ParsedLink {
        url: format!("https://pixeldrain.com/u/{id}"),
        host: Host::Pixeldrain,
        resource: id.to_string(),
    }
}

pub(crate) fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn phases_started(events: &[Event]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::PhaseStarted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_shutdown_before_run_submits_nothing() {
    let h = harness(MockDownloader::with_files(&[("a.bin", b"a")])).await;
    let mut rx = h.orchestrator.subscribe();
    h.orchestrator.shutdown();

    let outcome = h.orchestrator.run_links(&[pixeldrain("abc12345")]).await.unwrap();

    assert!(outcome.interrupted);
    assert_eq!(outcome.exit_code(), EXIT_INTERRUPTED);
    assert_eq!(outcome.stats.total, 1);
    assert_eq!(outcome.stats.completed + outcome.stats.failed, 0);
    assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);

    let task = h
        .orchestrator
        .db
        .get_task_by_url("https://pixeldrain.com/u/abc12345")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending, "task stays resumable");
    assert!(matches!(
        drain_events(&mut rx).first(),
        Some(Event::ShutdownRequested)
    ));
}

#[tokio::test]
async fn test_run_without_links_file_is_config_error() {
    let h = harness(MockDownloader::default()).await;
    let err = h.orchestrator.run().await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_run_reads_links_file() {
    let h = harness_with(
        MockDownloader::with_files(&[("clip.mp4", b"clip")]),
        Arc::new(FsRelocator::new()),
        |_| {},
    )
    .await;
    let links_file = h.temp.path().join("links.txt");
    std::fs::write(
        &links_file,
        "# weekend batch\n\nhttps://pixeldrain.com/u/abc12345\nhttps://unknown.example/file\n",
    )
    .unwrap();
    let mut config = (*h.orchestrator.config).clone();
    config.links_file = Some(links_file);
    let orchestrator = Orchestrator {
        config: Arc::new(config),
        ..h.orchestrator.clone()
    };

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.stats.total, 1);
    assert_eq!(outcome.stats.completed, 1);
    assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
}
