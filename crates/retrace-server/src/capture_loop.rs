//! Drives a [`CaptureSource`] into the ingest coordinator (spec.md §6).
//!
//! Platform capture itself is out of scope for this crate — a host
//! application supplies the `CaptureSource` implementation. What lives here
//! is the consumer loop every implementation is driven by: check the OS
//! grant once at startup, then pull frames one at a time so the coordinator
//! (and its queue-capacity backpressure) sees them as fast as it can take
//! them, never faster.

use retrace_core::capture::CaptureSource;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::coordinator::IngestCoordinator;

#[derive(Debug, Error)]
pub enum CaptureLoopError {
    #[error("screen recording permission not granted")]
    PermissionDenied,
    #[error("capture source failed to start: {0}")]
    StartFailed(#[source] anyhow::Error),
}

/// Check permission and, if granted, spawn a task that owns `capture` for
/// its lifetime and feeds every frame it yields to `coordinator.ingest`.
/// Returns `PermissionDenied` without spawning anything when the OS grant
/// is missing — the caller decides whether that should be fatal or just
/// mean "serving search only, no live capture".
pub async fn spawn(
    mut capture: Box<dyn CaptureSource>,
    coordinator: Arc<IngestCoordinator>,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, CaptureLoopError> {
    if !capture.has_permission() {
        return Err(CaptureLoopError::PermissionDenied);
    }

    capture.start().await.map_err(CaptureLoopError::StartFailed)?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = capture.next_frame() => {
                    match frame {
                        Some(frame) => coordinator.ingest(frame).await,
                        None => break,
                    }
                }
            }
        }
        if let Err(e) = capture.stop().await {
            tracing::warn!(error = %e, "capture source failed to stop cleanly");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use retrace_core::capture::{CapturedFrame, FixtureCaptureSource, NullCaptureSource};
    use retrace_core::types::FrameAppMetadata;
    use retrace_db::DatabaseConfig;
    use retrace_db::DatabaseManager;
    use retrace_federation::FederatedQueryLayer;
    use retrace_ocr::ReferenceOcrAdapter;
    use retrace_queue::{ProcessingQueue, QueueConfig};

    fn frame(ts: chrono::DateTime<chrono::Utc>) -> CapturedFrame {
        CapturedFrame {
            timestamp: ts,
            image: Arc::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2))),
            width: 2,
            height: 2,
            bytes_per_row: 8,
            metadata: FrameAppMetadata::default(),
        }
    }

    async fn coordinator(tmp: &std::path::Path) -> Arc<IngestCoordinator> {
        let db = Arc::new(
            DatabaseManager::open(DatabaseConfig::primary(tmp.to_path_buf()))
                .await
                .unwrap(),
        );
        let queue = Arc::new(ProcessingQueue::new(
            db.clone(),
            Arc::new(ReferenceOcrAdapter::new()),
            QueueConfig::default(),
        ));
        let federation = Arc::new(FederatedQueryLayer::new(db.clone(), Vec::new()));
        let config = retrace_core::config::RetraceConfig {
            storage_root: tmp.to_path_buf(),
            ..Default::default()
        };
        Arc::new(IngestCoordinator::new(&config, db, queue, federation))
    }

    #[tokio::test]
    async fn no_permission_is_rejected_without_spawning() {
        let tmp = tempfile::TempDir::new().unwrap();
        let coordinator = coordinator(tmp.path()).await;
        let err = spawn(
            Box::new(NullCaptureSource::default()),
            coordinator,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CaptureLoopError::PermissionDenied));
    }

    #[tokio::test]
    async fn frames_from_the_source_reach_the_coordinator() {
        let tmp = tempfile::TempDir::new().unwrap();
        let coordinator = coordinator(tmp.path()).await;
        let source = FixtureCaptureSource::new(vec![frame(chrono::Utc::now()), frame(chrono::Utc::now())], true);

        let handle = spawn(Box::new(source), coordinator.clone(), CancellationToken::new())
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(
            coordinator
                .stats()
                .frames_ingested
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }
}
