//! Bulk-import seam for bringing a foreign corpus into the primary store
//! (spec.md §6, supplemented). No concrete importer ships — this defines
//! the trait and progress contract `retrace-federation`'s secondary-corpus
//! path would be fed by, the same opaque-collaborator pattern already used
//! for capture and OCR.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("database error: {0}")]
    Db(#[from] retrace_db::DbError),
    #[error("storage error: {0}")]
    Storage(#[from] retrace_storage::StorageError),
}

/// Where the foreign corpus lives on disk. A concrete importer would parse
/// whatever schema/layout `kind` implies; this crate ships none.
#[derive(Debug, Clone)]
pub struct ImportSource {
    pub root: PathBuf,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationProgress {
    pub processed: u64,
    pub total: u64,
    pub stage: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub frames_imported: u64,
    pub sessions_imported: u64,
    pub segments_imported: u64,
    pub skipped: u64,
}

/// Called by an importer as it works through `ImportSource`, so a caller
/// (CLI progress bar, HTTP long-poll) can observe progress without the
/// importer depending on any particular UI.
pub trait ImportProgressDelegate: Send + Sync {
    fn on_progress(&self, progress: MigrationProgress);
}

/// A delegate that drops every update — the default when nobody is
/// watching.
pub struct NullProgressDelegate;

impl ImportProgressDelegate for NullProgressDelegate {
    fn on_progress(&self, _progress: MigrationProgress) {}
}

#[async_trait]
pub trait MigrationImporter: Send + Sync {
    async fn import(
        &self,
        source: ImportSource,
        delegate: &dyn ImportProgressDelegate,
    ) -> Result<ImportSummary, ImportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingDelegate {
        calls: AtomicU64,
    }

    impl ImportProgressDelegate for CountingDelegate {
        fn on_progress(&self, _progress: MigrationProgress) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct NoopImporter;

    #[async_trait]
    impl MigrationImporter for NoopImporter {
        async fn import(
            &self,
            _source: ImportSource,
            delegate: &dyn ImportProgressDelegate,
        ) -> Result<ImportSummary, ImportError> {
            delegate.on_progress(MigrationProgress {
                processed: 1,
                total: 1,
                stage: "done".to_string(),
            });
            Ok(ImportSummary {
                frames_imported: 1,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn importer_reports_progress_through_the_delegate() {
        let delegate = CountingDelegate { calls: AtomicU64::new(0) };
        let importer = NoopImporter;
        let summary = importer
            .import(
                ImportSource {
                    root: PathBuf::from("/tmp/foreign-corpus"),
                    kind: "example".to_string(),
                },
                &delegate,
            )
            .await
            .unwrap();
        assert_eq!(summary.frames_imported, 1);
        assert_eq!(delegate.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn null_delegate_accepts_progress_silently() {
        let importer = NoopImporter;
        let summary = importer
            .import(
                ImportSource {
                    root: PathBuf::from("/tmp/foreign-corpus"),
                    kind: "example".to_string(),
                },
                &NullProgressDelegate,
            )
            .await
            .unwrap();
        assert_eq!(summary.frames_imported, 1);
    }
}
