//! Durable chunk status store.
//!
//! One SQLite table keyed by `(x, y, prompt)`. Every mutation is its own
//! statement on a single connection with `synchronous = FULL`, so it is on
//! disk before the caller continues.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{FromRow, Pool, Sqlite};
use thiserror::Error;
use tileforge_common::{ChunkCoord, ChunkKey, ChunkStatus, Direction, PromptSummary, TileforgeError};
use tracing::{debug, info};

use crate::migrations;

/// Chunk store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Schema or stored data is not understood
    #[error("Schema error: {0}")]
    Schema(#[from] TileforgeError),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted chunk row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Grid coordinate and prompt
    pub key: ChunkKey,
    /// Generation status
    pub status: ChunkStatus,
    /// Provider operation handle
    pub operation_id: Option<String>,
    /// Provider world id
    pub world_id: Option<String>,
    /// Local asset file name, relative to the asset directory
    pub asset_path: Option<String>,
    /// Panorama image URL used to seed neighbours
    pub panorama_url: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ChunkRow {
    x: i64,
    y: i64,
    prompt: String,
    status: String,
    operation_id: Option<String>,
    world_id: Option<String>,
    asset_path: Option<String>,
    panorama_url: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ChunkRow> for ChunkRecord {
    type Error = StoreError;

    fn try_from(row: ChunkRow) -> StoreResult<Self> {
        let status = ChunkStatus::parse(&row.status)
            .ok_or_else(|| TileforgeError::UnknownStatus(row.status.clone()))?;
        Ok(Self {
            key: ChunkKey::new(ChunkCoord::new(row.x as i32, row.y as i32), row.prompt),
            status,
            operation_id: row.operation_id,
            world_id: row.world_id,
            asset_path: row.asset_path,
            panorama_url: row.panorama_url,
            created_at: millis_to_utc(row.created_at),
            updated_at: millis_to_utc(row.updated_at),
        })
    }
}

/// Field values written by [`ChunkStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkUpdate {
    /// Provider operation handle
    pub operation_id: Option<String>,
    /// Provider world id
    pub world_id: Option<String>,
    /// Local asset file name
    pub asset_path: Option<String>,
    /// Panorama URL
    pub panorama_url: Option<String>,
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

const SELECT_COLUMNS: &str = "SELECT x, y, prompt, status, operation_id, world_id, asset_path, \
     panorama_url, created_at, updated_at FROM chunks";

/// SQLite-backed chunk store.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    pool: Pool<Sqlite>,
}

impl ChunkStore {
    /// Opens (creating if needed) the store at `path` and applies migrations.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let version = migrations::run(&pool).await?;
        info!("Chunk store open at {} (schema {version})", path.display());
        Ok(Self { pool })
    }

    /// Deletes every row that is not `completed`.
    ///
    /// Interrupted jobs are never resumed; the next client request starts
    /// them afresh.
    pub async fn sweep_incomplete(&self) -> StoreResult<u64> {
        let removed = sqlx::query("DELETE FROM chunks WHERE status != ?")
            .bind(ChunkStatus::Completed.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            info!("Removed {removed} unfinished chunk rows from a previous run");
        }
        Ok(removed)
    }

    /// Fetches one record.
    pub async fn get(&self, key: &ChunkKey) -> StoreResult<Option<ChunkRecord>> {
        let row: Option<ChunkRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE x = ? AND y = ? AND prompt = ?"))
                .bind(key.x())
                .bind(key.y())
                .bind(&key.prompt)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ChunkRecord::try_from).transpose()
    }

    /// Creates a `generating` row unless one already exists.
    ///
    /// Returns `true` only for the caller that created the row.
    pub async fn insert_if_absent(&self, key: &ChunkKey) -> StoreResult<bool> {
        let now = now_millis();
        let inserted = sqlx::query(
            "INSERT INTO chunks (x, y, prompt, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (x, y, prompt) DO NOTHING",
        )
        .bind(key.x())
        .bind(key.y())
        .bind(&key.prompt)
        .bind(ChunkStatus::Generating.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        debug!(key = %key, inserted, "insert_if_absent");
        Ok(inserted)
    }

    /// Overwrites status and provider fields of an existing row.
    pub async fn update(
        &self,
        key: &ChunkKey,
        status: ChunkStatus,
        fields: &ChunkUpdate,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE chunks SET status = ?, operation_id = ?, world_id = ?, asset_path = ?,
                 panorama_url = ?, updated_at = ?
             WHERE x = ? AND y = ? AND prompt = ?",
        )
        .bind(status.as_str())
        .bind(&fields.operation_id)
        .bind(&fields.world_id)
        .bind(&fields.asset_path)
        .bind(&fields.panorama_url)
        .bind(now_millis())
        .bind(key.x())
        .bind(key.y())
        .bind(&key.prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes one record.
    pub async fn delete(&self, key: &ChunkKey) -> StoreResult<bool> {
        let removed = sqlx::query("DELETE FROM chunks WHERE x = ? AND y = ? AND prompt = ?")
            .bind(key.x())
            .bind(key.y())
            .bind(&key.prompt)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    /// Removes one record only while it still has `status`.
    ///
    /// A concurrent request that already replaced the row is left alone.
    pub async fn delete_if_status(
        &self,
        key: &ChunkKey,
        status: ChunkStatus,
    ) -> StoreResult<bool> {
        let removed = sqlx::query(
            "DELETE FROM chunks WHERE x = ? AND y = ? AND prompt = ? AND status = ?",
        )
        .bind(key.x())
        .bind(key.y())
        .bind(&key.prompt)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(removed > 0)
    }

    /// Probes west, east, south, north for a completed neighbour with a
    /// panorama and returns the first hit.
    pub async fn find_completed_neighbor(
        &self,
        key: &ChunkKey,
    ) -> StoreResult<Option<(Direction, ChunkRecord)>> {
        for direction in Direction::ALL {
            let Some(coord) = direction.step(key.coord) else {
                continue;
            };
            let neighbor = ChunkKey::new(coord, key.prompt.clone());
            if let Some(record) = self.get(&neighbor).await? {
                if record.status == ChunkStatus::Completed && record.panorama_url.is_some() {
                    return Ok(Some((direction, record)));
                }
            }
        }
        Ok(None)
    }

    /// Lists `(coord, status)` for one prompt, or for all prompts.
    pub async fn list_statuses(
        &self,
        prompt: Option<&str>,
    ) -> StoreResult<Vec<(ChunkCoord, ChunkStatus)>> {
        let rows: Vec<ChunkRow> = match prompt {
            Some(prompt) => {
                sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE prompt = ? ORDER BY y, x"))
                    .bind(prompt)
                    .fetch_all(&self.pool)
                    .await?
            },
            None => {
                sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY prompt, y, x"))
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        rows.into_iter()
            .map(|row| ChunkRecord::try_from(row).map(|r| (r.key.coord, r.status)))
            .collect()
    }

    /// Distinct prompts with their completed-chunk count, most recent first.
    pub async fn list_prompt_summaries(&self) -> StoreResult<Vec<PromptSummary>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT prompt, COUNT(*) AS chunk_count, MAX(updated_at) AS last_used
             FROM chunks WHERE status = ?
             GROUP BY prompt
             ORDER BY last_used DESC",
        )
        .bind(ChunkStatus::Completed.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(prompt, count, last_used)| PromptSummary {
                prompt,
                chunk_count: count as u64,
                last_used: millis_to_utc(last_used).to_rfc3339(),
            })
            .collect())
    }

    /// Deletes rows for one prompt (or all) and returns what was removed.
    pub async fn reset(&self, prompt: Option<&str>) -> StoreResult<Vec<ChunkRecord>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<ChunkRow> = match prompt {
            Some(prompt) => {
                let rows: Vec<ChunkRow> =
                    sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE prompt = ?"))
                        .bind(prompt)
                        .fetch_all(&mut *tx)
                        .await?;
                sqlx::query("DELETE FROM chunks WHERE prompt = ?")
                    .bind(prompt)
                    .execute(&mut *tx)
                    .await?;
                rows
            },
            None => {
                let rows: Vec<ChunkRow> =
                    sqlx::query_as(SELECT_COLUMNS).fetch_all(&mut *tx).await?;
                sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
                rows
            },
        };
        tx.commit().await?;
        rows.into_iter().map(ChunkRecord::try_from).collect()
    }

    /// Deletes every row with the given status.
    pub async fn delete_by_status(&self, status: ChunkStatus) -> StoreResult<u64> {
        Ok(sqlx::query("DELETE FROM chunks WHERE status = ?")
            .bind(status.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
