//! Retention & cleanup (spec.md §4.8).
//!
//! A periodic task runs hourly by default but `RetentionTask` itself only
//! enforces the floor — no more than once every 10 minutes — so a caller
//! that also wants to trigger a pass on demand (an admin endpoint, say)
//! can't starve the vacuum by hammering `run_once`.

use retrace_db::DatabaseManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const MIN_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Rows deleted/vacuumed by one retention pass, matching spec.md §7's
/// "structured result with a success flag and partial counts" contract for
/// retention errors.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetentionReport {
    pub frames_deleted: u64,
    pub orphan_segments_deleted: u64,
    pub sessions_deleted: u64,
    pub orphan_nodes_deleted: u64,
    pub video_files_deleted: u64,
    pub vacuumed: bool,
    pub success: bool,
    pub error: Option<String>,
}

/// Deletes are considered "enough" to justify a vacuum once they clear this
/// many rows — vacuuming after every small pass would make the retention
/// tick itself the dominant source of disk churn.
const VACUUM_ROW_THRESHOLD: u64 = 100;

pub struct RetentionTask {
    db: Arc<DatabaseManager>,
    retention_days: i64,
    last_run: Mutex<Option<Instant>>,
}

impl RetentionTask {
    pub fn new(db: Arc<DatabaseManager>, retention_days: i64) -> Self {
        Self {
            db,
            retention_days,
            last_run: Mutex::new(None),
        }
    }

    /// Run one retention pass unconditionally — `retention_days == 0` means
    /// forever, so this is a documented no-op in that case rather than a
    /// surprising full-corpus delete.
    pub async fn run_once(&self) -> RetentionReport {
        if self.retention_days == 0 {
            return RetentionReport {
                success: true,
                ..Default::default()
            };
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.retention_days);

        // Frames go first, by their own `created_at` — this cascades down to
        // their nodes/documents/FTS rows. Only once they're gone do we know
        // which video segments have lost their last remaining frame
        // reference and can be swept as orphans (spec.md §4.8, §8 scenario 5).
        let frames_deleted = match self.db.delete_frames_before(cutoff).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "retention: frame delete failed");
                return RetentionReport {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let video_paths = match self.db.delete_orphan_video_segments().await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "retention: orphan video segment sweep failed");
                return RetentionReport {
                    frames_deleted,
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let mut video_files_deleted = 0u64;
        for relative_path in &video_paths {
            let absolute = self.db.config().storage_root.join(relative_path);
            match std::fs::remove_file(&absolute) {
                Ok(()) => video_files_deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %absolute.display(), error = %e, "retention: failed to remove video file"),
            }
        }

        let sessions_deleted = match self.db.delete_sessions_before(cutoff).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "retention: session delete failed");
                return RetentionReport {
                    frames_deleted,
                    orphan_segments_deleted: video_paths.len() as u64,
                    video_files_deleted,
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let orphan_nodes = self.db.delete_orphan_nodes().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "retention: orphan node sweep failed");
            0
        });

        let total_deleted =
            frames_deleted + video_paths.len() as u64 + sessions_deleted + orphan_nodes;
        let vacuumed = if total_deleted >= VACUUM_ROW_THRESHOLD {
            match self.db.vacuum().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "retention: vacuum failed");
                    false
                }
            }
        } else {
            false
        };

        tracing::info!(
            frames_deleted,
            orphan_segments_deleted = video_paths.len(),
            sessions_deleted,
            orphan_nodes,
            vacuumed,
            "retention pass complete"
        );

        RetentionReport {
            frames_deleted,
            orphan_segments_deleted: video_paths.len() as u64,
            sessions_deleted,
            orphan_nodes_deleted: orphan_nodes,
            video_files_deleted,
            vacuumed,
            success: true,
            error: None,
        }
    }

    /// Run a pass only if `MIN_INTERVAL` has elapsed since the last one —
    /// the rate-limit floor an on-demand caller (CLI, admin route) must
    /// respect. Returns `None` when the call was suppressed.
    pub async fn run_rate_limited(&self) -> Option<RetentionReport> {
        let mut last_run = self.last_run.lock().await;
        if let Some(prev) = *last_run {
            if prev.elapsed() < MIN_INTERVAL {
                tracing::debug!("retention: skipped, rate limit floor not yet elapsed");
                return None;
            }
        }
        *last_run = Some(Instant::now());
        drop(last_run);
        Some(self.run_once().await)
    }

    /// Spawn the hourly background tick. The returned handle can be
    /// aborted on shutdown; cancellation is checked once per iteration
    /// before the next sleep (spec.md §5).
    pub fn spawn_periodic(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DEFAULT_INTERVAL) => {}
                }
                if cancel.is_cancelled() {
                    break;
                }
                if let Some(report) = self.run_rate_limited().await {
                    if !report.success {
                        tracing::warn!(error = ?report.error, "retention tick reported failure; will retry next tick");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::types::CorpusSource;
    use retrace_db::DatabaseConfig;

    async fn manager(root: &std::path::Path) -> Arc<DatabaseManager> {
        Arc::new(DatabaseManager::open(DatabaseConfig::primary(root.to_path_buf())).await.unwrap())
    }

    #[tokio::test]
    async fn retention_days_zero_is_a_no_op() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = manager(tmp.path()).await;
        let task = RetentionTask::new(db, 0);
        let report = task.run_once().await;
        assert!(report.success);
        assert_eq!(report.frames_deleted, 0);
    }

    /// A video segment with no referencing frame at all is an orphan from
    /// the moment it's inserted — the sweep has no `end_date` cutoff of its
    /// own, it only checks for zero remaining frame references.
    #[tokio::test]
    async fn scenario_retention_deletes_orphan_segment_and_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = manager(tmp.path()).await;

        let old_relative = "chunks/old-segment";
        let old_absolute = tmp.path().join(old_relative);
        std::fs::write(&old_absolute, b"fake-video-bytes").unwrap();

        db.insert_video_segment(&retrace_core::types::VideoSegment {
            id: 0,
            start_time: chrono::Utc::now() - chrono::Duration::days(101),
            end_time: chrono::Utc::now() - chrono::Duration::days(100),
            frame_count: 1,
            file_size_bytes: 17,
            relative_path: old_relative.to_string(),
            width: 1,
            height: 1,
            source: CorpusSource::Primary,
        })
        .await
        .unwrap();

        let task = RetentionTask::new(db, 30);
        let report = task.run_once().await;
        assert!(report.success);
        assert_eq!(report.orphan_segments_deleted, 1);
        assert_eq!(report.video_files_deleted, 1);
        assert!(!old_absolute.exists());
    }

    /// A frame older than the cutoff is deleted; a video segment still
    /// referenced by a surviving, newer frame is kept rather than swept.
    #[tokio::test]
    async fn scenario_retention_deletes_old_frame_and_keeps_referenced_segment() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = manager(tmp.path()).await;

        let relative = "chunks/segment";
        let video_id = db
            .insert_video_segment(&retrace_core::types::VideoSegment {
                id: 0,
                start_time: chrono::Utc::now() - chrono::Duration::days(40),
                end_time: chrono::Utc::now(),
                frame_count: 2,
                file_size_bytes: 17,
                relative_path: relative.to_string(),
                width: 1,
                height: 1,
                source: CorpusSource::Primary,
            })
            .await
            .unwrap();

        let old_frame = db
            .insert_pending_frame(
                chrono::Utc::now() - chrono::Duration::days(40),
                &retrace_db::frames::NewFrame::default(),
            )
            .await
            .unwrap();
        db.attach_frame_to_video(old_frame, video_id, 0).await.unwrap();

        let new_frame = db
            .insert_pending_frame(chrono::Utc::now(), &retrace_db::frames::NewFrame::default())
            .await
            .unwrap();
        db.attach_frame_to_video(new_frame, video_id, 1).await.unwrap();

        let task = RetentionTask::new(db.clone(), 30);
        let report = task.run_once().await;
        assert!(report.success);
        assert_eq!(report.frames_deleted, 1);
        assert_eq!(report.orphan_segments_deleted, 0);

        assert!(db.get_frame(old_frame).await.is_err());
        assert!(db.get_frame(new_frame).await.is_ok());
        assert!(db.get_video_segment(video_id).await.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_suppresses_back_to_back_calls() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = manager(tmp.path()).await;
        let task = RetentionTask::new(db, 30);

        assert!(task.run_rate_limited().await.is_some());
        assert!(task.run_rate_limited().await.is_none());
    }
}
