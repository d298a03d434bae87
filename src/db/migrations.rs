//! Store lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// Newest schema version this build knows how to create
pub(crate) const SCHEMA_VERSION: i64 = 1;

fn connection_failed<E: Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed<E: Display>(context: String) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("{context}: {e}")))
}

impl Database {
    /// Open (or create) the task store at `path`
    ///
    /// Creates the file and its parent directory when missing and applies any
    /// outstanding migrations. Safe to call on every process start: existing
    /// rows are never touched.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(connection_failed("failed to create database directory"))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connection_failed("failed to parse database path"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("failed to connect to database"))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Applied schema version, 0 for a store that has never been migrated
    pub async fn schema_version(&self) -> Result<i64> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(connection_failed("failed to acquire connection"))?;
        Self::current_version(&mut conn).await
    }

    async fn current_version(conn: &mut SqliteConnection) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "failed to query schema version: {e}"
                )))
            })?;
        Ok(version.unwrap_or(0))
    }

    async fn migrate(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(connection_failed("failed to acquire connection"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_failed("failed to create schema_version table".into()))?;

        let current = Self::current_version(&mut conn).await?;
        if current > SCHEMA_VERSION {
            tracing::warn!(
                current,
                known = SCHEMA_VERSION,
                "store was written by a newer version; continuing with the known schema"
            );
        }
        if current < 1 {
            Self::apply(&mut conn, 1).await?;
        }
        Ok(())
    }

    /// Run one migration step inside a transaction and record it
    async fn apply(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        tracing::info!(version, "applying store migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(migration_failed(format!("failed to begin migration v{version}")))?;

        let result = async {
            match version {
                1 => Self::create_tasks_schema(&mut *conn).await?,
                _ => {
                    return Err(Error::Database(DatabaseError::MigrationFailed(format!(
                        "no migration v{version}"
                    ))));
                }
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(migration_failed(format!("failed to record migration v{version}")))?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(e);
        }

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(migration_failed(format!("failed to commit migration v{version}")))?;
        tracing::info!(version, "store migration complete");
        Ok(())
    }

    async fn create_tasks_schema(conn: &mut SqliteConnection) -> Result<()> {
        // seq keeps insertion order stable when two tasks share a timestamp
        let statements = [
            "CREATE TABLE IF NOT EXISTS tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL UNIQUE,
                host TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                output_paths TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                retries INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at, seq)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(migration_failed("failed to create tasks schema".into()))?;
        }
        Ok(())
    }

    /// Close the store's connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
