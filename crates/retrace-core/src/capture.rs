//! External collaborator contract: screen capture.
//!
//! Platform-specific capture (permissions, display enumeration, pixel
//! grabbing) is out of scope for this crate — it is implemented by a host
//! application against the [`CaptureSource`] trait. Only the interface and a
//! couple of deterministic stand-ins used in tests live here.

use crate::types::FrameAppMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Arc;

/// A single captured screenshot moment, as handed off by the platform
/// capture layer.
#[derive(Clone)]
pub struct CapturedFrame {
    pub timestamp: DateTime<Utc>,
    pub image: Arc<DynamicImage>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the original BGRA buffer, kept for adapters that
    /// need to re-derive stride without re-encoding the image.
    pub bytes_per_row: u32,
    pub metadata: FrameMetadata,
}

/// App/window/display metadata accompanying a captured frame.
pub type FrameMetadata = FrameAppMetadata;

/// The capture collaborator's external interface (spec.md §6).
///
/// `start`/`stop` bracket a capture session; `next_frame` pulls frames one
/// at a time so the ingest coordinator can apply backpressure instead of
/// being handed an unbounded stream.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Whether the OS has granted screen-recording permission.
    fn has_permission(&self) -> bool;

    /// Begin producing frames. Idempotent if already started.
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Stop producing frames. Idempotent if already stopped.
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Pull the next captured frame, or `None` once the source has stopped
    /// and drained.
    async fn next_frame(&mut self) -> Option<CapturedFrame>;
}

/// A capture source that never produces a frame — useful for wiring up a
/// `ServiceContainer` when vision capture is disabled.
#[derive(Default)]
pub struct NullCaptureSource {
    started: bool,
}

#[async_trait]
impl CaptureSource for NullCaptureSource {
    fn has_permission(&self) -> bool {
        false
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.started = false;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<CapturedFrame> {
        None
    }
}

/// A deterministic, in-memory capture source for tests: replays a fixed
/// sequence of frames and then reports exhaustion.
pub struct FixtureCaptureSource {
    frames: std::collections::VecDeque<CapturedFrame>,
    permitted: bool,
}

impl FixtureCaptureSource {
    pub fn new(frames: Vec<CapturedFrame>, permitted: bool) -> Self {
        Self {
            frames: frames.into(),
            permitted,
        }
    }
}

#[async_trait]
impl CaptureSource for FixtureCaptureSource {
    fn has_permission(&self) -> bool {
        self.permitted
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.frames.clear();
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<CapturedFrame> {
        self.frames.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn frame(ts: DateTime<Utc>) -> CapturedFrame {
        CapturedFrame {
            timestamp: ts,
            image: Arc::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2))),
            width: 2,
            height: 2,
            bytes_per_row: 8,
            metadata: FrameMetadata::default(),
        }
    }

    #[tokio::test]
    async fn fixture_source_replays_in_order_then_exhausts() {
        let t0 = Utc::now();
        let mut src = FixtureCaptureSource::new(vec![frame(t0), frame(t0)], true);
        assert!(src.has_permission());
        assert!(src.next_frame().await.is_some());
        assert!(src.next_frame().await.is_some());
        assert!(src.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn null_source_never_yields_frames() {
        let mut src = NullCaptureSource::default();
        src.start().await.unwrap();
        assert!(src.next_frame().await.is_none());
        assert!(!src.has_permission());
    }
}
