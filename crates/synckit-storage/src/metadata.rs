// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded SQLite store of per-file last-read times.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::Result;

/// One row per cached filename with its last access time in ms since epoch.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if needed) the store at `path` and ensure its schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the schema if absent.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_access (
                filename TEXT PRIMARY KEY NOT NULL,
                last_read INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_access_last_read ON file_access (last_read)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    /// Record an access, inserting the row if needed.
    pub async fn upsert(&self, filename: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_access (filename, last_read) VALUES (?, ?)
            ON CONFLICT (filename) DO UPDATE SET last_read = excluded.last_read
            "#,
        )
        .bind(filename)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a row only if the filename is unknown. Returns whether a row was added.
    pub async fn insert_if_new(&self, filename: &str, at: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query("INSERT INTO file_access (filename, last_read) VALUES (?, ?) ON CONFLICT (filename) DO NOTHING")
            .bind(filename)
            .bind(at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// The `total - max_entries` least recently read filenames, oldest first.
    /// Empty while the store holds at most `max_entries` rows.
    pub async fn oldest_exceeding(&self, max_entries: usize) -> Result<Vec<String>> {
        let candidates = self.eviction_candidates(max_entries).await?;
        Ok(candidates.into_iter().map(|(name, _)| name).collect())
    }

    /// Like [`oldest_exceeding`](Self::oldest_exceeding), paired with each
    /// row's `last_read` in ms for [`delete_if_unchanged`](Self::delete_if_unchanged).
    pub async fn eviction_candidates(&self, max_entries: usize) -> Result<Vec<(String, i64)>> {
        let total = self.count().await?;
        let max_entries = i64::try_from(max_entries).unwrap_or(i64::MAX);
        if total <= max_entries {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as(
            "SELECT filename, last_read FROM file_access ORDER BY last_read ASC, filename ASC LIMIT ?",
        )
        .bind(total - max_entries)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete the row only if its `last_read` is still `last_read_ms`.
    /// Returns whether a row was deleted.
    pub async fn delete_if_unchanged(&self, filename: &str, last_read_ms: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM file_access WHERE filename = ? AND last_read = ?")
            .bind(filename)
            .bind(last_read_ms)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_access WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM file_access")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Last recorded access for `filename`.
    pub async fn last_read(&self, filename: &str) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = sqlx::query_scalar("SELECT last_read FROM file_access WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    /// Close the pool, waiting for open connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
