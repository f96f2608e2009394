//! SQLite-backed job record store (sqlx).
//!
//! One row per owner holding that owner's job records as a JSON document.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};

use crate::error::StoreError;

use super::{JobRecordStore, OwnerJobs};

/// Handle to the SQLite job store.
///
/// The database file lives under the XDG state directory:
/// `~/.local/state/bulkq/jobs.db`.
#[derive(Clone)]
pub struct SqliteJobStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl SqliteJobStore {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("bulkq")?;
        let state_dir = xdg_dirs.get_state_home();
        Self::open_at(state_dir.join("jobs.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Options take the path as-is; no URI escaping involved.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = SqliteJobStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // `jobs_json` is the owner's full job map; `job_count` is kept beside it
        // so `status` listings don't need to decode every document.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS owner_jobs (
                owner_id TEXT PRIMARY KEY,
                jobs_json TEXT NOT NULL,
                job_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of jobs stored per owner, without decoding documents.
    pub async fn job_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, job_count
            FROM owner_jobs
            ORDER BY owner_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("owner_id"), row.get("job_count")))
            .collect())
    }
}

#[async_trait]
impl JobRecordStore for SqliteJobStore {
    async fn get_owner_jobs(&self, owner_id: &str) -> Result<OwnerJobs, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT jobs_json
            FROM owner_jobs
            WHERE owner_id = ?1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(OwnerJobs::new());
        };
        let json: String = row.get("jobs_json");
        Ok(serde_json::from_str(&json)?)
    }

    async fn put_owner_jobs(&self, owner_id: &str, jobs: &OwnerJobs) -> Result<(), StoreError> {
        if jobs.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM owner_jobs
                WHERE owner_id = ?1
                "#,
            )
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let json = serde_json::to_string(jobs)?;
        sqlx::query(
            r#"
            INSERT INTO owner_jobs (owner_id, jobs_json, job_count, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner_id) DO UPDATE SET
                jobs_json = excluded.jobs_json,
                job_count = excluded.job_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner_id)
        .bind(json)
        .bind(jobs.len() as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_owners(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id
            FROM owner_jobs
            ORDER BY owner_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("owner_id")).collect())
    }
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<SqliteJobStore> {
    // Single connection so the pool never hands back a different empty DB.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store = SqliteJobStore { pool };
    store.migrate().await?;
    Ok(store)
}
