//! Async frame-processing queue (spec.md §4.3).
//!
//! The durable queue lives in `retrace-db`'s `frame` table itself —
//! `processing_status` is the state machine, and `claim_pending_frames`
//! gives atomic, exclusive pending→processing transitions so two workers
//! can never pick up the same frame. This crate owns the worker pool that
//! drains it: each worker claims a frame, runs it through OCR, writes the
//! resulting document, and marks it completed or sends it back to pending
//! with a bumped retry count (or parks it at `failed` once retries are
//! exhausted).

pub mod backoff;
pub mod stats;

pub use stats::{QueueStats, QueueStatsSnapshot};

use retrace_core::capture::CapturedFrame;
use retrace_core::types::FrameAppMetadata;
use retrace_db::DatabaseManager;
use retrace_ocr::OcrAdapter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is at capacity ({0} frames pending or processing)")]
    QueueFull(i64),
    #[error("database error: {0}")]
    Db(#[from] retrace_db::DbError),
    #[error("retryable processing error: {0}")]
    RetryableProcessingError(String),
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_count: usize,
    pub max_retry_attempts: u32,
    pub max_queue_size: usize,
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            max_retry_attempts: 3,
            max_queue_size: 1000,
            poll_interval: Duration::from_millis(500),
            backoff_base: backoff::DEFAULT_BASE,
            backoff_cap: backoff::DEFAULT_CAP,
        }
    }
}

/// Drains the `frame` table's backlog with a fixed pool of workers.
pub struct ProcessingQueue {
    db: Arc<DatabaseManager>,
    ocr: Arc<dyn OcrAdapter>,
    config: QueueConfig,
    stats: Arc<QueueStats>,
    notify: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessingQueue {
    pub fn new(db: Arc<DatabaseManager>, ocr: Arc<dyn OcrAdapter>, config: QueueConfig) -> Self {
        Self {
            db,
            ocr,
            config,
            stats: Arc::new(QueueStats::default()),
            notify: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }

    /// Reset any frame left in `processing` from a prior run that never
    /// finished (spec.md §8, crash recovery). Call before `start`.
    pub async fn recover_from_crash(&self) -> Result<u64, QueueError> {
        let recovered = self.db.reset_processing_to_pending().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "recovered frames stuck in processing at startup");
        }
        Ok(recovered)
    }

    /// Current count of frames not yet `completed`/`failed` — what
    /// `max_queue_size` bounds.
    pub async fn depth(&self) -> Result<i64, QueueError> {
        let backlog: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM frame WHERE processing_status IN ('pending', 'processing')",
        )
        .fetch_one(self.db.pool())
        .await
        .map_err(retrace_db::DbError::from)?;
        Ok(backlog)
    }

    /// Checked before the ingest coordinator inserts a new frame row —
    /// returns `QueueFull` once the backlog reaches `max_queue_size` so an
    /// OCR outage degrades into dropped captures rather than unbounded
    /// disk growth.
    pub async fn check_capacity(&self) -> Result<(), QueueError> {
        let depth = self.depth().await?;
        if depth >= self.config.max_queue_size as i64 {
            return Err(QueueError::QueueFull(depth));
        }
        Ok(())
    }

    /// Wake any worker currently idling on its poll interval.
    pub fn notify_work_available(&self) {
        self.notify.notify_one();
    }

    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.config.worker_count {
            let queue = self.clone();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id).await;
            }));
        }
    }

    /// Signal every worker to finish its current frame and exit, then wait
    /// for them to join.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        tracing::debug!(worker_id, "queue worker started");
        while !self.stopping.load(Ordering::SeqCst) {
            let claimed = match self.db.claim_pending_frames(1).await {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "failed to claim frame");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            let Some(frame) = claimed.into_iter().next() else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            self.stats.set_depth(self.depth().await.unwrap_or(0));

            if let Err(e) = self.process_frame(&frame).await {
                tracing::warn!(worker_id, frame_id = frame.id, error = %e, "frame processing failed");
            }
        }
        tracing::debug!(worker_id, "queue worker stopped");
    }

    async fn process_frame(&self, frame: &retrace_db::Frame) -> Result<(), QueueError> {
        let video_id = frame.video_id.ok_or_else(|| {
            QueueError::RetryableProcessingError("claimed frame has no video_id".into())
        })?;
        let index = frame.video_frame_index.ok_or_else(|| {
            QueueError::RetryableProcessingError("claimed frame has no video_frame_index".into())
        })?;

        // `run_ocr` writes the document, its nodes, and the frame's
        // `completed` transition in one transaction (spec.md §4.3 "Steps
        // 4–6 occur in one transaction") — nothing left to commit here.
        let result = self.run_ocr(frame, video_id, index).await;

        match result {
            Ok(()) => {
                self.stats.record_processed();
                Ok(())
            }
            Err(e) => {
                let status = self
                    .db
                    .mark_frame_retry_or_failed(
                        frame.id,
                        &e.to_string(),
                        self.config.max_retry_attempts as i64,
                    )
                    .await?;

                match status {
                    retrace_core::types::ProcessingStatus::Failed => {
                        self.stats.record_failed();
                    }
                    _ => {
                        self.stats.record_retried();
                        let delay = backoff::delay_for_attempt(
                            frame.retry_count as u32,
                            self.config.backoff_base,
                            self.config.backoff_cap,
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_ocr(
        &self,
        frame: &retrace_db::Frame,
        video_id: i64,
        index: i64,
    ) -> Result<(), QueueError> {
        let segment = self.db.get_video_segment(video_id).await?;
        let absolute_path = self.db.config().storage_root.join(&segment.relative_path);

        let image = retrace_storage::read_frame_at(&absolute_path, index as u32).map_err(|e| {
            QueueError::RetryableProcessingError(format!("could not read frame from segment: {e}"))
        })?;

        let captured = CapturedFrame {
            timestamp: frame.created_at,
            image: Arc::new(image),
            width: segment.width,
            height: segment.height,
            bytes_per_row: segment.width * 4,
            metadata: FrameAppMetadata {
                app_bundle_id: frame.app_bundle_id.clone(),
                app_name: frame.app_name.clone(),
                window_title: frame.window_title.clone(),
                browser_url: frame.browser_url.clone(),
                display_index: frame.display_index as u32,
            },
        };

        let extracted = self
            .ocr
            .extract_text(&captured)
            .await
            .map_err(|e| QueueError::RetryableProcessingError(e.to_string()))?;

        let nodes: Vec<retrace_core::types::OcrNode> = extracted
            .regions
            .iter()
            .enumerate()
            .map(|(i, region)| retrace_core::types::OcrNode {
                frame_id: frame.id,
                node_order: i as i64,
                text_offset: extracted
                    .full_text
                    .find(region.text.as_str())
                    .unwrap_or(0) as i64,
                text_length: region.text.len() as i64,
                left_x: region.bounds.0,
                top_y: region.bounds.1,
                width: region.bounds.2,
                height: region.bounds.3,
                window_index: frame.display_index,
            })
            .collect();

        let doc = retrace_db::IndexedDocument {
            frame_id: frame.id,
            created_at: frame.created_at,
            content: extracted.full_text,
            chrome_text: extracted.chrome_text,
            app_name: frame.app_name.clone(),
            window_name: frame.window_title.clone(),
            url: frame.browser_url.clone(),
        };

        self.db.insert_document_with_nodes(&doc, &nodes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{DynamicImage, RgbImage};
    use retrace_db::frames::NewFrame;
    use retrace_db::DatabaseConfig;
    use retrace_ocr::ReferenceOcrAdapter;
    use retrace_storage::{JpegContainerEncoder, NewEncoder, SegmentWriter};

    async fn seeded_db_with_frame(tmp: &std::path::Path) -> (Arc<DatabaseManager>, i64) {
        let db = Arc::new(
            DatabaseManager::open(DatabaseConfig::primary(tmp.to_path_buf()))
                .await
                .unwrap(),
        );

        let mut writer =
            SegmentWriter::<JpegContainerEncoder>::create(tmp, Utc::now()).unwrap();
        writer
            .append_frame(
                &DynamicImage::ImageRgb8(RgbImage::new(4, 4)),
                Utc::now(),
            )
            .unwrap();
        let segment = writer.finalize().unwrap();
        let video_id = db.insert_video_segment(&segment).await.unwrap();

        let frame_id = db
            .insert_pending_frame(Utc::now(), &NewFrame::default())
            .await
            .unwrap();
        db.attach_frame_to_video(frame_id, video_id, 0).await.unwrap();

        (db, frame_id)
    }

    #[tokio::test]
    async fn worker_processes_a_claimed_frame_to_completion() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (db, frame_id) = seeded_db_with_frame(tmp.path()).await;

        let queue = Arc::new(ProcessingQueue::new(
            db.clone(),
            Arc::new(ReferenceOcrAdapter::with_fixed_text("hello there")),
            QueueConfig {
                worker_count: 1,
                ..Default::default()
            },
        ));
        queue.start();

        for _ in 0..50 {
            let frame = db.get_frame(frame_id).await.unwrap();
            if frame.processing_status == retrace_core::types::ProcessingStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        queue.stop().await;

        let frame = db.get_frame(frame_id).await.unwrap();
        assert_eq!(frame.processing_status, retrace_core::types::ProcessingStatus::Completed);
        let doc = db.get_document(frame_id).await.unwrap().unwrap();
        assert_eq!(doc.content, "hello there");
    }

    #[tokio::test]
    async fn recover_from_crash_resets_stuck_frames() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (db, frame_id) = seeded_db_with_frame(tmp.path()).await;
        sqlx::query("UPDATE frame SET processing_status = 'processing' WHERE id = ?1")
            .bind(frame_id)
            .execute(db.pool())
            .await
            .unwrap();

        let queue = ProcessingQueue::new(
            db.clone(),
            Arc::new(ReferenceOcrAdapter::new()),
            QueueConfig::default(),
        );
        let recovered = queue.recover_from_crash().await.unwrap();
        assert_eq!(recovered, 1);

        let frame = db.get_frame(frame_id).await.unwrap();
        assert_eq!(frame.processing_status, retrace_core::types::ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn check_capacity_rejects_once_backlog_hits_the_limit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (db, _frame_id) = seeded_db_with_frame(tmp.path()).await;

        let queue = ProcessingQueue::new(
            db.clone(),
            Arc::new(ReferenceOcrAdapter::new()),
            QueueConfig {
                max_queue_size: 1,
                ..Default::default()
            },
        );

        let err = queue.check_capacity().await.unwrap_err();
        assert!(matches!(err, QueueError::QueueFull(1)));
    }
}
