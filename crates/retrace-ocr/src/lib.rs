//! External collaborator contract: OCR.
//!
//! The actual OCR engine (model download, inference, language packs) is out
//! of scope — this crate defines the opaque `OcrAdapter` interface the rest
//! of the system programs against (spec.md §4.5), plus a deterministic
//! reference adapter that makes the rest of the workspace runnable and
//! testable without a real model.

use async_trait::async_trait;
use retrace_core::capture::CapturedFrame;
use thiserror::Error;

/// One text region detected on a frame, before it is normalized into an
/// `OcrNode` row (that normalization needs the frame's pixel dimensions,
/// which live in `retrace-core::CapturedFrame`, so it happens at the call
/// site rather than inside the adapter).
#[derive(Debug, Clone, PartialEq)]
pub struct OcrRegion {
    pub text: String,
    /// Normalized bounding box in `[0, 1]`: (x, y, width, height).
    pub bounds: (f64, f64, f64, f64),
    pub confidence: f32,
}

/// The adapter's normalized output for one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedText {
    /// Full concatenated text of the frame — populates the primary FTS
    /// column and the `IndexedDocument.content`.
    pub full_text: String,
    /// Auxiliary text (e.g. browser chrome/URL bar) — populates the
    /// auxiliary FTS column.
    pub chrome_text: String,
    pub regions: Vec<OcrRegion>,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine is not initialized")]
    NotInitialized,
    #[error("OCR engine rejected the frame: {0}")]
    EngineRejected(String),
}

/// The OCR collaborator's external interface (spec.md §4.5, §6).
///
/// Adapters must be idempotent and free of hidden state between calls: the
/// same frame passed twice must produce the same `ExtractedText`.
#[async_trait]
pub trait OcrAdapter: Send + Sync {
    async fn extract_text(&self, frame: &CapturedFrame) -> Result<ExtractedText, OcrError>;
}

/// A deterministic adapter used as the default and in tests: splits
/// whitespace-joined text into regions laid out as equal horizontal bands,
/// with no external model dependency.
///
/// Real deployments substitute a platform OCR engine behind the same trait;
/// this adapter exists so the rest of the pipeline (indexing, search,
/// federation) is exercisable end-to-end without one.
#[derive(Default)]
pub struct ReferenceOcrAdapter {
    /// Text to report for frames that don't carry their own fixture text.
    /// In production this would never be used — captured frames always
    /// come with pixels, not pre-baked text; tests set `with_fixed_text`.
    fixed_text: Option<String>,
}

impl ReferenceOcrAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixed_text(text: impl Into<String>) -> Self {
        Self {
            fixed_text: Some(text.into()),
        }
    }
}

#[async_trait]
impl OcrAdapter for ReferenceOcrAdapter {
    async fn extract_text(&self, _frame: &CapturedFrame) -> Result<ExtractedText, OcrError> {
        let text = self.fixed_text.clone().unwrap_or_default();
        if text.is_empty() {
            return Ok(ExtractedText::default());
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let band_height = if words.is_empty() {
            0.0
        } else {
            1.0 / words.len() as f64
        };

        let mut regions = Vec::with_capacity(words.len());
        let mut offset = 0usize;
        for (i, word) in words.iter().enumerate() {
            let start = text[offset..]
                .find(word)
                .map(|p| offset + p)
                .unwrap_or(offset);
            regions.push(OcrRegion {
                text: word.to_string(),
                bounds: (0.0, i as f64 * band_height, 1.0, band_height),
                confidence: 0.99,
            });
            offset = start + word.len();
        }

        Ok(ExtractedText {
            full_text: text.clone(),
            chrome_text: String::new(),
            regions,
        })
    }
}
