use super::*;

#[tokio::test]
async fn test_new_links_create_pending_tasks_in_order() {
    let h = harness(MockDownloader::default()).await;
    let links = [pixeldrain("aaaa1111"), pixeldrain("bbbb2222")];

    let tasks = h.orchestrator.reconcile(&links).await.unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].url, links[0].url);
    assert_eq!(tasks[1].url, links[1].url);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = harness(MockDownloader::default()).await;
    let links = [pixeldrain("aaaa1111"), pixeldrain("bbbb2222")];

    let first = h.orchestrator.reconcile(&links).await.unwrap();
    let second = h.orchestrator.reconcile(&links).await.unwrap();

    let ids = |tasks: &[Task]| tasks.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert!(second.iter().all(|t| t.status == TaskStatus::Pending));
    assert_eq!(h.orchestrator.db.list_tasks().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_hosts_and_duplicates_are_dropped() {
    let h = harness(MockDownloader::default()).await;
    let unknown = ParsedLink {
        url: "https://files.example.com/x".to_string(),
        host: Host::Unknown,
        resource: "https://files.example.com/x".to_string(),
    };
    let links = [pixeldrain("aaaa1111"), unknown, pixeldrain("aaaa1111")];

    let tasks = h.orchestrator.reconcile(&links).await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(h.orchestrator.db.list_tasks().await.unwrap().len(), 1);
    assert_eq!(h.orchestrator.statistics().await.skipped, 0);
}

#[tokio::test]
async fn test_known_host_without_id_is_dropped() {
    let h = harness(MockDownloader::default()).await;
    let bare = ParsedLink {
        url: "https://pixeldrain.com/".to_string(),
        host: Host::Pixeldrain,
        resource: "https://pixeldrain.com/".to_string(),
    };
    let links = [bare, pixeldrain("aaaa1111")];

    let tasks = h.orchestrator.reconcile(&links).await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].url, "https://pixeldrain.com/u/aaaa1111");
    assert!(
        h.orchestrator
            .db
            .get_task_by_url("https://pixeldrain.com/")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_done_task_is_skipped() {
    let h = harness(MockDownloader::default()).await;
    let link = pixeldrain("aaaa1111");
    let task = h.orchestrator.db.create_task(&link.url, link.host).await.unwrap();
    h.orchestrator
        .db
        .update_status(&task.id, TaskStatus::Done, None)
        .await
        .unwrap();

    let tasks = h.orchestrator.reconcile(&[link]).await.unwrap();

    assert!(tasks.is_empty());
    assert_eq!(h.orchestrator.statistics().await.skipped, 1);
}

#[tokio::test]
async fn test_failed_task_skipped_without_retry() {
    let h = harness(MockDownloader::default()).await;
    let link = pixeldrain("aaaa1111");
    let task = h.orchestrator.db.create_task(&link.url, link.host).await.unwrap();
    h.orchestrator
        .db
        .update_status(&task.id, TaskStatus::Failed, Some("timeout"))
        .await
        .unwrap();

    let tasks = h.orchestrator.reconcile(&[link]).await.unwrap();

    assert!(tasks.is_empty());
    assert_eq!(h.orchestrator.statistics().await.skipped, 1);
    let stored = h.orchestrator.db.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.retries, 0);
}

#[tokio::test]
async fn test_failed_task_reset_when_retrying() {
    let h = harness_with(
        MockDownloader::default(),
        Arc::new(FsRelocator::new()),
        |config| config.retry_failed = true,
    )
    .await;
    let link = pixeldrain("aaaa1111");
    let task = h.orchestrator.db.create_task(&link.url, link.host).await.unwrap();
    h.orchestrator
        .db
        .update_status(&task.id, TaskStatus::Failed, Some("timeout"))
        .await
        .unwrap();

    let tasks = h.orchestrator.reconcile(&[link]).await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task.id);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(tasks[0].error, None);
    assert_eq!(tasks[0].retries, 1);
    assert_eq!(h.orchestrator.statistics().await.skipped, 0);
}

#[tokio::test]
async fn test_in_progress_task_resumes_as_is() {
    let h = harness(MockDownloader::default()).await;
    let link = pixeldrain("aaaa1111");
    let task = h.orchestrator.db.create_task(&link.url, link.host).await.unwrap();
    h.orchestrator
        .db
        .update_status(&task.id, TaskStatus::Extracting, None)
        .await
        .unwrap();

    let tasks = h.orchestrator.reconcile(&[link]).await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Extracting);
    assert_eq!(tasks[0].retries, 0);
}
