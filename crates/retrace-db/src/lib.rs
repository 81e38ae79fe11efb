//! The relational store (spec.md §4.2): frames, video segments, app
//! sessions, OCR nodes, and the FTS index that `retrace-search` queries.
//!
//! One `DatabaseManager` wraps one `sqlx::SqlitePool` plus the
//! [`DatabaseConfig`] that tells every query in this crate which timestamp
//! encoding to read and write. `retrace-federation` holds one manager for
//! the primary corpus and zero or more for secondary, read-only corpora.

pub mod config;
pub mod documents;
pub mod frames;
pub mod maintenance;
pub mod schema;
pub mod segments;

pub use config::{DatabaseConfig, TimestampEncoding};
pub use documents::IndexedDocument;
pub use frames::Frame;
pub use maintenance::StorageStats;
pub use retrace_core::types::{CorpusSource, EncodingStatus, ProcessingStatus};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database is not connected")]
    NotConnected,
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
    #[error("frame {0} not found")]
    FrameNotFound(i64),
    #[error("video segment {0} not found")]
    VideoSegmentNotFound(i64),
    #[error("failed to parse stored value: {0}")]
    ParseFailed(String),
}

/// Owns the pool and the encoding rules every query in this crate binds
/// against.
pub struct DatabaseManager {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl DatabaseManager {
    /// Open (creating if missing) the primary, writable corpus.
    pub async fn open(config: DatabaseConfig) -> Result<Self, DbError> {
        Self::open_inner(config, None).await
    }

    /// Open a read-only corpus encrypted the way SQLCipher expects: a
    /// `PRAGMA key` issued before anything else touches the connection.
    /// `retrace-federation` uses this for secondary, historical corpora.
    pub async fn open_encrypted(config: DatabaseConfig, password: &str) -> Result<Self, DbError> {
        Self::open_inner(config, Some(password)).await
    }

    async fn open_inner(config: DatabaseConfig, password: Option<&str>) -> Result<Self, DbError> {
        if !config.read_only {
            if let Some(parent) = config.db_path().parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::ParseFailed(format!("could not create storage root: {e}"))
                })?;
            }
        }

        let mut opts = SqliteConnectOptions::new()
            .filename(config.db_path())
            .foreign_keys(true)
            .create_if_missing(!config.read_only);

        if let Some(pw) = password {
            opts = opts
                .pragma("key", pw.to_string())
                .pragma("cipher_compatibility", "4");
        }

        if !config.read_only {
            opts = opts.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if config.read_only { 4 } else { 8 })
            .connect_with(opts)
            .await?;

        if !config.read_only {
            schema::apply_migrations(&pool).await?;
        }

        tracing::info!(
            path = %config.db_path().display(),
            read_only = config.read_only,
            "database manager opened"
        );

        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_storage_root_and_runs_migrations() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("dir");
        let db = DatabaseManager::open(DatabaseConfig::primary(root.clone()))
            .await
            .unwrap();

        assert!(root.exists());
        let version_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(version_count > 0);
    }
}
