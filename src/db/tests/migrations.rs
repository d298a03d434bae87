use crate::db::*;
use crate::types::Host;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let mut conn = db.pool.acquire().await.unwrap();
    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert!(tables.contains(&"tasks".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    let indexes: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='tasks'")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
    assert!(indexes.contains(&"idx_tasks_status".to_string()));

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_reopen_preserves_rows() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("state.db");

    let db = Database::new(&path).await.unwrap();
    let task = db
        .create_task("https://pixeldrain.com/u/abc12345", Host::Pixeldrain)
        .await
        .unwrap();
    db.close().await;

    let db = Database::new(&path).await.unwrap();
    let reopened = db.get_task(&task.id).await.unwrap();
    assert_eq!(reopened, Some(task), "row should survive reopening the store");

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1], "migration must be applied exactly once");
    assert_eq!(db.schema_version().await.unwrap(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("nested").join("work").join("state.db");

    let db = Database::new(&path).await.unwrap();
    assert!(path.exists());
    db.close().await;
}
