//! Ingest coordinator (spec.md §4.4).
//!
//! Turns one [`CapturedFrame`] at a time into durable state: rotate the
//! open video segment when it hits `segment_frames_cap`, append the frame
//! to the segment, open/close the `AppSession` the frame belongs to, and
//! insert a `pending` frame row for the queue to pick up. No per-frame
//! error is allowed to stop the pipeline — a failure is logged, counted,
//! and the next frame is tried.

use retrace_core::capture::CapturedFrame;
use retrace_core::config::RetraceConfig;
use retrace_db::frames::NewFrame;
use retrace_db::DatabaseManager;
use retrace_federation::FederatedQueryLayer;
use retrace_queue::ProcessingQueue;
use retrace_storage::{JpegContainerEncoder, NewEncoder, SegmentWriter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("database error: {0}")]
    Db(#[from] retrace_db::DbError),
    #[error("storage error: {0}")]
    Storage(#[from] retrace_storage::StorageError),
    #[error("queue error: {0}")]
    Queue(#[from] retrace_queue::QueueError),
}

/// A frame written into the currently-open segment, waiting for that
/// segment to finalize so its `video_id` can be attached.
struct PendingAttachment {
    frame_id: i64,
    video_frame_index: u32,
}

struct OpenSegment {
    writer: SegmentWriter<JpegContainerEncoder>,
    pending: Vec<PendingAttachment>,
}

/// Running counters surfaced on the stats/health route (spec.md §7).
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub frames_ingested: AtomicU64,
    pub frames_failed: AtomicU64,
    pub segments_finalized: AtomicU64,
}

pub struct IngestCoordinator {
    db: Arc<DatabaseManager>,
    queue: Arc<ProcessingQueue>,
    federation: Arc<FederatedQueryLayer>,
    storage_root: std::path::PathBuf,
    segment_frames_cap: u32,
    current_segment: Mutex<Option<OpenSegment>>,
    current_app: Mutex<Option<(Option<String>, Option<String>, Option<String>)>>,
    stats: Arc<CoordinatorStats>,
}

impl IngestCoordinator {
    pub fn new(
        config: &RetraceConfig,
        db: Arc<DatabaseManager>,
        queue: Arc<ProcessingQueue>,
        federation: Arc<FederatedQueryLayer>,
    ) -> Self {
        Self {
            db,
            queue,
            federation,
            storage_root: config.storage_root.clone(),
            segment_frames_cap: config.segment_frames_cap,
            current_segment: Mutex::new(None),
            current_app: Mutex::new(None),
            stats: Arc::new(CoordinatorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CoordinatorStats> {
        self.stats.clone()
    }

    /// Ingest one captured frame. Never returns an error that should halt
    /// the capture loop — callers that want the failure reason for
    /// logging get it back, but the caller's loop keeps going regardless.
    pub async fn ingest(&self, frame: CapturedFrame) {
        if let Err(e) = self.ingest_inner(&frame).await {
            self.stats.frames_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "dropping frame after ingest failure");
            return;
        }
        self.stats.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    async fn ingest_inner(&self, frame: &CapturedFrame) -> Result<(), CoordinatorError> {
        self.queue.check_capacity().await?;

        self.maybe_update_session(frame).await?;

        let frame_id = self
            .db
            .insert_pending_frame(
                frame.timestamp,
                &NewFrame {
                    segment_id: None,
                    app_bundle_id: frame.metadata.app_bundle_id.clone(),
                    app_name: frame.metadata.app_name.clone(),
                    window_title: frame.metadata.window_title.clone(),
                    browser_url: frame.metadata.browser_url.clone(),
                    display_index: frame.metadata.display_index as i64,
                },
            )
            .await?;

        let mut guard = self.current_segment.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_segment(frame.timestamp)?);
        }

        let should_rotate = {
            let open = guard.as_ref().unwrap();
            open.writer.frame_count() >= self.segment_frames_cap
        };
        if should_rotate {
            let finished = guard.take().unwrap();
            self.finalize_segment(finished).await?;
            *guard = Some(self.open_segment(frame.timestamp)?);
        }

        let open = guard.as_mut().unwrap();
        let video_frame_index = open.writer.append_frame(&frame.image, frame.timestamp)?;
        open.pending.push(PendingAttachment {
            frame_id,
            video_frame_index,
        });
        drop(guard);

        self.queue.notify_work_available();
        Ok(())
    }

    fn open_segment(&self, started_at: chrono::DateTime<chrono::Utc>) -> Result<OpenSegment, CoordinatorError> {
        let writer = SegmentWriter::<JpegContainerEncoder>::create(&self.storage_root, started_at)?;
        Ok(OpenSegment {
            writer,
            pending: Vec::new(),
        })
    }

    async fn finalize_segment(&self, open: OpenSegment) -> Result<(), CoordinatorError> {
        let OpenSegment { writer, pending } = open;
        if writer.frame_count() == 0 {
            return Ok(());
        }
        let segment = writer.finalize()?;
        let video_id = self.db.insert_video_segment(&segment).await?;
        for attachment in pending {
            self.db
                .attach_frame_to_video(attachment.frame_id, video_id, attachment.video_frame_index as i64)
                .await?;
        }
        self.stats.segments_finalized.fetch_add(1, Ordering::Relaxed);
        self.queue.notify_work_available();
        Ok(())
    }

    /// Open a new `AppSession` whenever the focused bundle id, window
    /// title, or browser URL changes from the last frame seen.
    async fn maybe_update_session(&self, frame: &CapturedFrame) -> Result<(), CoordinatorError> {
        let Some(bundle_id) = frame.metadata.app_bundle_id.clone() else {
            return Ok(());
        };

        let key = (
            Some(bundle_id.clone()),
            frame.metadata.window_title.clone(),
            frame.metadata.browser_url.clone(),
        );

        let mut current = self.current_app.lock().await;
        if current.as_ref() == Some(&key) {
            return Ok(());
        }

        let session_type = if frame.metadata.browser_url.is_some() {
            retrace_core::types::SessionType::Browser
        } else {
            retrace_core::types::SessionType::Application
        };

        self.db
            .open_app_session(
                frame.timestamp,
                &bundle_id,
                frame.metadata.window_title.as_deref(),
                frame.metadata.browser_url.as_deref(),
                session_type,
            )
            .await?;
        *current = Some(key);
        // A federated session query could have cached a merged result that
        // no longer reflects this freshly opened (or just-closed) session.
        self.federation.invalidate_session_cache().await;
        Ok(())
    }

    /// Finalize whatever segment is open and close the active session.
    /// Called on graceful shutdown so no frames are left dangling without
    /// a `video_id`.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        let mut guard = self.current_segment.lock().await;
        if let Some(open) = guard.take() {
            self.finalize_segment(open).await?;
        }
        drop(guard);
        self.db.close_active_session(chrono::Utc::now()).await?;
        self.federation.invalidate_session_cache().await;
        Ok(())
    }
}
