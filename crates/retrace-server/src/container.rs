//! Wires the whole service together from one [`RetraceConfig`] (spec.md §9):
//! the primary store, every configured secondary, the federated query
//! layer over both, the processing queue, the ingest coordinator, the
//! retention task, and the lifecycle state machine. Nothing here is global
//! state — a `ServiceContainer` is built once and handed around by `Arc`.

use retrace_core::config::RetraceConfig;
use retrace_db::{DatabaseConfig, DatabaseManager};
use retrace_federation::{FederatedQueryLayer, SecondarySource};
use retrace_ocr::OcrAdapter;
use retrace_queue::{ProcessingQueue, QueueConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::IngestCoordinator;
use crate::lifecycle::Lifecycle;
use crate::retention::RetentionTask;

pub struct ServiceContainer {
    pub config: RetraceConfig,
    pub primary_db: Arc<DatabaseManager>,
    pub federation: Arc<FederatedQueryLayer>,
    pub queue: Arc<ProcessingQueue>,
    pub coordinator: Arc<IngestCoordinator>,
    pub retention: Arc<RetentionTask>,
    pub lifecycle: Arc<Lifecycle>,
}

impl ServiceContainer {
    /// Open the primary store and every configured secondary, then wire up
    /// the rest of the service. Secondary corpora that fail to open (bad
    /// passphrase, missing file) are logged and skipped rather than
    /// aborting startup — a federated query simply proceeds without that
    /// source (spec.md §4.7 degrades gracefully when a secondary is
    /// unreachable).
    pub async fn build(config: RetraceConfig, ocr: Arc<dyn OcrAdapter>) -> anyhow::Result<Self> {
        let primary_db = Arc::new(DatabaseManager::open(DatabaseConfig::primary(config.storage_root.clone())).await?);

        let mut secondaries = Vec::new();
        for source in &config.secondary_sources {
            let db_config = DatabaseConfig::secondary_at(
                source.db_path.clone(),
                source.chunks_path.clone(),
                source.cutoff_date,
            );
            match DatabaseManager::open_encrypted(db_config, &source.password).await {
                Ok(db) => secondaries.push(SecondarySource {
                    db: Arc::new(db),
                    cutoff: source.cutoff_date,
                }),
                Err(e) => {
                    tracing::warn!(
                        db_path = %source.db_path.display(),
                        error = %e,
                        "secondary source unavailable at startup, skipping"
                    );
                }
            }
        }

        let federation = Arc::new(FederatedQueryLayer::new(primary_db.clone(), secondaries));

        let queue = Arc::new(ProcessingQueue::new(
            primary_db.clone(),
            ocr,
            QueueConfig {
                worker_count: config.worker_count,
                max_retry_attempts: config.max_retry_attempts,
                max_queue_size: config.max_queue_size,
                poll_interval: Duration::from_millis(500),
                ..Default::default()
            },
        ));

        let coordinator = Arc::new(IngestCoordinator::new(
            &config,
            primary_db.clone(),
            queue.clone(),
            federation.clone(),
        ));
        let retention = Arc::new(RetentionTask::new(primary_db.clone(), config.retention_days));
        let lifecycle = Arc::new(Lifecycle::new());

        Ok(Self {
            config,
            primary_db,
            federation,
            queue,
            coordinator,
            retention,
            lifecycle,
        })
    }

    /// Recover any frame left mid-processing by a prior crash, then start
    /// the queue workers (spec.md §8 crash recovery).
    pub async fn start(&self) -> anyhow::Result<()> {
        self.queue.recover_from_crash().await?;
        self.queue.start();
        Ok(())
    }

    /// Finalize the open segment, stop queue workers, and flush the
    /// current app session — the orderly counterpart to `start`.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.coordinator.shutdown().await?;
        self.queue.stop().await;
        Ok(())
    }
}
