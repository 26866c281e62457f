//! Versioned schema migrations for the chunk store.
//!
//! Each step runs once, inside its own transaction, and is recorded in
//! `schema_migrations`. A database written by a newer build is refused
//! rather than silently rewritten.

use sqlx::{Pool, Sqlite};
use tileforge_common::{SchemaVersion, TileforgeError};
use tracing::info;

use crate::store::{StoreError, StoreResult};

/// A single forward-only schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version reached after this step
    pub version: SchemaVersion,
    /// Short description for logs
    pub description: &'static str,
    /// Statements to execute
    pub sql: &'static str,
}

/// Ordered list of all migrations.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: SchemaVersion::new(1),
        description: "create chunks table",
        sql: "CREATE TABLE IF NOT EXISTS chunks (
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL,
                operation_id TEXT,
                world_id TEXT,
                asset_path TEXT,
                panorama_url TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (x, y, prompt)
            )",
    },
    Migration {
        version: SchemaVersion::new(2),
        description: "track last update time",
        sql: "ALTER TABLE chunks ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;
              UPDATE chunks SET updated_at = created_at",
    },
    Migration {
        version: SchemaVersion::new(3),
        description: "index chunks by prompt and status",
        sql: "CREATE INDEX IF NOT EXISTS idx_chunks_prompt_status ON chunks (prompt, status)",
    },
];

/// Newest schema version this build knows.
#[must_use]
pub fn latest_version() -> SchemaVersion {
    MIGRATIONS
        .last()
        .map_or(SchemaVersion::EMPTY, |m| m.version)
}

/// Returns the version recorded in the database.
pub async fn current_version(pool: &Pool<Sqlite>) -> StoreResult<SchemaVersion> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(SchemaVersion::new(version.unwrap_or(0) as u32))
}

/// Applies every pending migration.
pub async fn run(pool: &Pool<Sqlite>) -> StoreResult<SchemaVersion> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let current = current_version(pool).await?;
    let latest = latest_version();
    if current > latest {
        return Err(StoreError::Schema(TileforgeError::VersionMismatch {
            expected: latest.to_string(),
            actual: current.to_string(),
        }));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)",
        )
        .bind(i64::from(migration.version.get()))
        .bind(migration.description)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(
            "Applied migration {} ({})",
            migration.version, migration.description
        );
    }

    Ok(latest)
}
