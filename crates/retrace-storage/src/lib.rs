//! Segment writer (spec.md §4.1).
//!
//! Accepts a stream of frames, appends them into a single open video
//! container, and on `finalize()` closes the file and returns a
//! `VideoSegment` descriptor. The container format itself is behind the
//! [`FrameEncoder`] trait — the same opaque-collaborator pattern used for
//! capture and OCR — so the writer doesn't care whether frames land as
//! concatenated JPEGs (the [`JpegContainerEncoder`] shipped here) or a real
//! platform codec.

pub mod encoder;
pub mod path;
pub mod reader;

pub use encoder::{EncoderOutput, FrameEncoder, JpegContainerEncoder};
pub use reader::{read_frame_at, ReadError};

use chrono::{DateTime, Utc};
use retrace_core::types::{CorpusSource, VideoSegment};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("segment writer is already closed")]
    WriterClosed,
    #[error("encoder rejected frame: {0}")]
    EncoderError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives one [`FrameEncoder`] across the lifetime of a single video
/// segment file.
pub struct SegmentWriter<E: FrameEncoder> {
    encoder: E,
    relative_path: String,
    absolute_path: PathBuf,
    frame_count: u32,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    closed: bool,
}

impl<E: FrameEncoder> SegmentWriter<E> {
    /// Open a new segment at `<root>/chunks/YYYYMM/<unix-ms>`.
    pub fn create(root: &std::path::Path, started_at: DateTime<Utc>) -> Result<Self, StorageError>
    where
        E: NewEncoder,
    {
        let relative_path = path::segment_relative_path(started_at);
        let absolute_path = root.join(&relative_path);
        if let Some(parent) = absolute_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoder = E::create(&absolute_path)?;
        Ok(Self {
            encoder,
            relative_path,
            absolute_path,
            frame_count: 0,
            start_time: None,
            end_time: None,
            closed: false,
        })
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn absolute_path(&self) -> &std::path::Path {
        &self.absolute_path
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Append a frame, returning the `videoFrameIndex` it was written at
    /// (equal to the segment's frame count before this append).
    pub fn append_frame(
        &mut self,
        image: &image::DynamicImage,
        captured_at: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        if self.closed {
            return Err(StorageError::WriterClosed);
        }

        let index = self.frame_count;
        self.encoder
            .append(image)
            .map_err(|e| StorageError::EncoderError(e.to_string()))?;

        self.frame_count += 1;
        if self.start_time.is_none() {
            self.start_time = Some(captured_at);
        }
        self.end_time = Some(captured_at);

        Ok(index)
    }

    /// Flush the encoder, write the trailer, fsync the file, and return an
    /// accurate descriptor. The writer is unusable after this call.
    pub fn finalize(mut self) -> Result<VideoSegment, StorageError> {
        if self.closed {
            return Err(StorageError::WriterClosed);
        }
        self.closed = true;

        let output = self
            .encoder
            .finalize()
            .map_err(|e| StorageError::EncoderError(e.to_string()))?;

        let file_size_bytes = std::fs::metadata(&self.absolute_path)?.len() as i64;

        let now = Utc::now();
        Ok(VideoSegment {
            id: 0, // assigned by the relational store on insert
            start_time: self.start_time.unwrap_or(now),
            end_time: self.end_time.unwrap_or(now),
            frame_count: output.frame_count as i64,
            file_size_bytes,
            relative_path: self.relative_path.clone(),
            width: output.width,
            height: output.height,
            source: CorpusSource::Primary,
        })
    }
}

/// Separate from `FrameEncoder` so the writer can be generic over "any
/// encoder that can be freshly opened at a path" without requiring every
/// encoder implementation to expose a constructor with the same signature
/// as its trait object form.
pub trait NewEncoder: FrameEncoder + Sized {
    fn create(path: &std::path::Path) -> Result<Self, std::io::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;

    fn img(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
    }

    #[test]
    fn append_then_finalize_reports_accurate_descriptor() {
        let tmp = TempDir::new().unwrap();
        let mut writer =
            SegmentWriter::<JpegContainerEncoder>::create(tmp.path(), Utc::now()).unwrap();

        let i0 = writer.append_frame(&img(16, 9), Utc::now()).unwrap();
        let i1 = writer.append_frame(&img(16, 9), Utc::now()).unwrap();
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);

        let segment = writer.finalize().unwrap();
        assert_eq!(segment.frame_count, 2);
        assert_eq!(segment.width, 16);
        assert_eq!(segment.height, 9);
        assert!(segment.end_time >= segment.start_time);

        let abs = tmp.path().join(&segment.relative_path);
        assert!(abs.exists());
        assert_eq!(abs.metadata().unwrap().len() as i64, segment.file_size_bytes);
    }

    /// `finalize()` consumes `self`, so "append after finalize" can't be
    /// expressed against one writer instance — this drives the same
    /// `closed` flag path finalize leaves behind, directly.
    #[test]
    fn append_after_finalize_fails() {
        let tmp = TempDir::new().unwrap();
        let mut writer =
            SegmentWriter::<JpegContainerEncoder>::create(tmp.path(), Utc::now()).unwrap();
        writer.append_frame(&img(4, 4), Utc::now()).unwrap();
        writer.closed = true;

        let err = writer.append_frame(&img(4, 4), Utc::now()).unwrap_err();
        assert!(matches!(err, StorageError::WriterClosed));
    }

    #[test]
    fn double_finalize_fails_with_writer_closed() {
        let tmp = TempDir::new().unwrap();
        let mut writer =
            SegmentWriter::<JpegContainerEncoder>::create(tmp.path(), Utc::now()).unwrap();
        writer.append_frame(&img(4, 4), Utc::now()).unwrap();
        writer.closed = true;

        let err = writer.finalize().unwrap_err();
        assert!(matches!(err, StorageError::WriterClosed));
    }

    #[test]
    fn relative_path_has_no_extension_and_is_under_chunks() {
        let tmp = TempDir::new().unwrap();
        let writer =
            SegmentWriter::<JpegContainerEncoder>::create(tmp.path(), Utc::now()).unwrap();
        assert!(writer.relative_path().starts_with("chunks/"));
        assert!(std::path::Path::new(writer.relative_path())
            .extension()
            .is_none());
    }
}
