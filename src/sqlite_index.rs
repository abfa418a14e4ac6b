//! SQLite-backed [`SimilarityIndex`].
//!
//! The index lives in `<index.path>/index.sqlite`:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `meta` | `model` (embedding model name), `created_at` (RFC 3339) |
//! | `entries` | One row per chunk with its text, provenance and vector BLOB |
//!
//! Similarity is brute-force cosine computed in Rust over every stored
//! vector, the same way for all query sizes. A single writer per index
//! directory is assumed.
//!
//! `create` writes a fresh database next to the live one
//! (`index.sqlite.tmp`) and renames it into place only after the write
//! commits, so a failed rebuild leaves the previous index open and intact.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use repolens_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use repolens_core::models::{Chunk, IndexEntry, Language};
use repolens_core::store::{rank_candidates, Candidate, SimilarityIndex};

use crate::db;
use crate::migrate;

pub struct SqliteIndex {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteIndex {
    /// An index stored under directory `dir`. Nothing is touched until
    /// `open` or `create` runs.
    pub fn new(dir: &Path) -> Self {
        Self {
            path: db::db_file(dir),
            pool: Mutex::new(None),
        }
    }

    /// Database file location.
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Creation timestamp recorded in the index metadata, if open.
    pub async fn created_at(&self) -> Result<Option<String>> {
        let pool = self.pool()?;
        read_meta(&pool, "created_at").await
    }

    fn staging_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.tmp", self.path.display()))
    }

    fn pool(&self) -> Result<SqlitePool> {
        self.pool
            .lock()
            .map_err(|_| anyhow!("index pool lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("index at {} is not open", self.path.display()))
    }

    fn set_pool(&self, pool: Option<SqlitePool>) -> Result<Option<SqlitePool>> {
        let mut guard = self
            .pool
            .lock()
            .map_err(|_| anyhow!("index pool lock poisoned"))?;
        Ok(std::mem::replace(&mut *guard, pool))
    }
}

async fn read_meta(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

async fn write_index(pool: &SqlitePool, model: &str, entries: &[IndexEntry]) -> Result<()> {
    migrate::run_migrations(pool).await?;

    let mut tx = pool.begin().await?;
    let created_at = chrono::Utc::now().to_rfc3339();
    for (key, value) in [("model", model), ("created_at", created_at.as_str())] {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }
    insert_entries(&mut tx, entries).await?;
    tx.commit().await.context("Failed to write index")?;
    Ok(())
}

async fn insert_entries(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entries: &[IndexEntry],
) -> Result<()> {
    for entry in entries {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO entries (id, path, language, ordinal, start_offset, text, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                language = excluded.language,
                ordinal = excluded.ordinal,
                start_offset = excluded.start_offset,
                text = excluded.text,
                hash = excluded.hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.path)
        .bind(chunk.language.as_str())
        .bind(chunk.ordinal as i64)
        .bind(chunk.start as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_candidate(row: &SqliteRow, query: &[f32]) -> Result<Candidate> {
    let tag: String = row.get("language");
    let language =
        Language::parse_tag(&tag).ok_or_else(|| anyhow!("unknown language tag in index: {}", tag))?;
    let blob: Vec<u8> = row.get("embedding");
    let vector = blob_to_vec(&blob);
    let ordinal: i64 = row.get("ordinal");
    let start: i64 = row.get("start_offset");

    Ok(Candidate {
        score: cosine_similarity(query, &vector),
        chunk: Chunk {
            id: row.get("id"),
            path: row.get("path"),
            language,
            ordinal: ordinal as usize,
            start: start as usize,
            text: row.get("text"),
            hash: row.get("hash"),
        },
        vector,
    })
}

#[async_trait]
impl SimilarityIndex for SqliteIndex {
    async fn open(&self, model: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        let pool = db::connect(&self.path, false).await?;
        if !migrate::schema_present(&pool).await? {
            pool.close().await;
            return Err(anyhow!(
                "{} is not a repolens index (missing tables)",
                self.path.display()
            ));
        }

        match read_meta(&pool, "model").await? {
            Some(stored) if stored == model => {}
            Some(stored) => {
                warn!(
                    stored = %stored,
                    configured = model,
                    "index was built with a different embedding model, rebuilding"
                );
                pool.close().await;
                return Ok(false);
            }
            None => {
                pool.close().await;
                return Ok(false);
            }
        }

        if let Some(old) = self.set_pool(Some(pool))? {
            old.close().await;
        }
        Ok(true)
    }

    async fn create(&self, model: &str, entries: &[IndexEntry]) -> Result<()> {
        let staging = self.staging_path();
        db::remove_db_files(&staging)?;

        let staged = db::connect(&staging, true).await?;
        let written = write_index(&staged, model, entries).await;
        // Closing the last connection checkpoints the WAL into the main file.
        staged.close().await;
        if let Err(e) = written {
            if let Err(cleanup) = db::remove_db_files(&staging) {
                warn!(error = %cleanup, "failed to remove staged index");
            }
            return Err(e);
        }

        if let Some(old) = self.set_pool(None)? {
            old.close().await;
        }
        db::remove_db_files(&self.path)?;
        std::fs::rename(&staging, &self.path).with_context(|| {
            format!("Failed to move {} into place", staging.display())
        })?;
        db::remove_db_files(&staging)?;

        let pool = db::connect(&self.path, false).await?;
        info!(path = %self.path.display(), entries = entries.len(), "index written");
        self.set_pool(Some(pool))?;
        Ok(())
    }

    async fn append(&self, entries: &[IndexEntry]) -> Result<()> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;
        insert_entries(&mut tx, entries).await?;
        tx.commit().await.context("Failed to append to index")?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let pool = self.pool()?;
        let rows = sqlx::query(
            "SELECT id, path, language, ordinal, start_offset, text, hash, embedding FROM entries",
        )
        .fetch_all(&pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| row_to_candidate(row, query))
            .collect::<Result<Vec<_>>>()?;
        Ok(rank_candidates(candidates, limit))
    }

    async fn len(&self) -> Result<usize> {
        let pool = self.pool()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&pool)
            .await?;
        Ok(count as usize)
    }
}
