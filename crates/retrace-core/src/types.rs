//! Domain types shared across every retrace crate.
//!
//! These mirror the entities in the data model: `Frame`, `VideoSegment`,
//! `AppSession`, `OCRNode`, `IndexedDocument`. The authoritative row shapes
//! live in `retrace-db`; this module holds the plain values that flow
//! between crates without a sqlx dependency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type FrameId = i64;
pub type SegmentId = i64;
pub type VideoId = i64;

/// Per-frame state for the OCR/indexing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// Per-frame state for the video pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStatus {
    Pending,
    Success,
    Failed,
}

impl EncodingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingStatus::Pending => "pending",
            EncodingStatus::Success => "success",
            EncodingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EncodingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EncodingStatus::Pending),
            "success" => Ok(EncodingStatus::Success),
            "failed" => Ok(EncodingStatus::Failed),
            other => Err(format!("unknown encoding status: {other}")),
        }
    }
}

/// Which corpus a row belongs to: the writable primary store, or a
/// read-only historical secondary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusSource {
    Primary,
    Secondary,
}

impl CorpusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusSource::Primary => "primary",
            CorpusSource::Secondary => "secondary",
        }
    }
}

/// AppSession.type — mirrors the foreign schema's session "type" column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Application,
    Browser,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Application => "application",
            SessionType::Browser => "browser",
        }
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application" => Ok(SessionType::Application),
            "browser" => Ok(SessionType::Browser),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

/// A contiguous span of a single (appBundleID, windowTitle) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSession {
    pub id: SegmentId,
    pub bundle_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub window_name: Option<String>,
    pub browser_url: Option<String>,
    pub session_type: SessionType,
    pub source: CorpusSource,
}

/// A finalized video file covering contiguous frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegment {
    pub id: VideoId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frame_count: i64,
    pub file_size_bytes: i64,
    pub relative_path: String,
    pub width: u32,
    pub height: u32,
    pub source: CorpusSource,
}

/// One text region detected on a frame by the OCR adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrNode {
    pub frame_id: FrameId,
    pub node_order: i64,
    pub text_offset: i64,
    pub text_length: i64,
    /// Normalized rectangle, each component in `[0, 1]`.
    pub left_x: f64,
    pub top_y: f64,
    pub width: f64,
    pub height: f64,
    /// Index of the on-screen window this region belongs to, for frames
    /// with more than one visible window.
    pub window_index: i64,
}

impl OcrNode {
    /// True when every coordinate of the normalized rectangle lies in `[0, 1]`.
    pub fn bounds_are_normalized(&self) -> bool {
        [self.left_x, self.top_y, self.width, self.height]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

/// Frame metadata carried alongside the pixel buffer and the persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FrameAppMetadata {
    pub app_bundle_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub browser_url: Option<String>,
    pub display_index: u32,
}
