// retrace — a personal screen-memory engine
// Shared domain types, configuration, and external-collaborator contracts.

pub mod capture;
pub mod config;
pub mod types;

pub use capture::{CaptureSource, CapturedFrame, FrameMetadata};
pub use config::{RetraceConfig, SecondarySourceConfig};
pub use types::{
    AppSession, CorpusSource, EncodingStatus, FrameId, OcrNode, ProcessingStatus, SegmentId,
    SessionType, VideoSegment,
};
