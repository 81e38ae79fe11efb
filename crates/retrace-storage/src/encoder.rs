//! The `FrameEncoder` trait and a concrete container format.
//!
//! `JpegContainerEncoder` writes each frame as a JPEG (via `image`, the same
//! crate `screenpipe-vision::snapshot_writer` uses for individual
//! snapshots), length-prefixed, into a single extensionless file, and
//! appends a small trailer on `finalize()` recording `frameCount`, `width`,
//! and `height` so a reader can seek straight to any frame without
//! re-scanning the whole file.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

use crate::NewEncoder;

#[derive(Debug, Error)]
pub enum EncoderErrorKind {
    #[error("frame dimensions {got_w}x{got_h} do not match segment dimensions {expected_w}x{expected_h}")]
    DimensionMismatch {
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accurate segment stats produced by `finalize()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOutput {
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
}

/// Any container format a `SegmentWriter` can drive. Mirrors the
/// opaque-collaborator shape of `OcrAdapter`/`CaptureSource`: the writer
/// above never inspects the bytes an encoder produces.
pub trait FrameEncoder: Send {
    type Error: std::fmt::Display;

    fn append(&mut self, image: &DynamicImage) -> Result<(), Self::Error>;
    fn finalize(&mut self) -> Result<EncoderOutput, Self::Error>;
}

const MAGIC: &[u8; 4] = b"RTR1";
const JPEG_QUALITY: u8 = 80;

/// Concatenated-JPEG container: `[len:u32][jpeg bytes]` repeated, followed
/// by a trailer `[MAGIC][frame_count:u32][width:u32][height:u32]`.
pub struct JpegContainerEncoder {
    file: BufWriter<File>,
    frame_count: u32,
    width: Option<u32>,
    height: Option<u32>,
    finalized: bool,
}

impl NewEncoder for JpegContainerEncoder {
    fn create(path: &Path) -> Result<Self, std::io::Error> {
        let file = File::create(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            frame_count: 0,
            width: None,
            height: None,
            finalized: false,
        })
    }
}

impl FrameEncoder for JpegContainerEncoder {
    type Error = EncoderErrorKind;

    fn append(&mut self, image: &DynamicImage) -> Result<(), Self::Error> {
        let (w, h) = (image.width(), image.height());
        match (self.width, self.height) {
            (None, None) => {
                self.width = Some(w);
                self.height = Some(h);
            }
            (Some(ew), Some(eh)) if ew != w || eh != h => {
                return Err(EncoderErrorKind::DimensionMismatch {
                    expected_w: ew,
                    expected_h: eh,
                    got_w: w,
                    got_h: h,
                });
            }
            _ => {}
        }

        let mut jpeg_bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, JPEG_QUALITY);
        encoder.encode_image(image)?;

        self.file.write_all(&(jpeg_bytes.len() as u32).to_le_bytes())?;
        self.file.write_all(&jpeg_bytes)?;
        self.frame_count += 1;

        Ok(())
    }

    fn finalize(&mut self) -> Result<EncoderOutput, Self::Error> {
        if self.finalized {
            let width = self.width.unwrap_or(0);
            let height = self.height.unwrap_or(0);
            return Ok(EncoderOutput {
                frame_count: self.frame_count,
                width,
                height,
            });
        }
        self.finalized = true;

        let width = self.width.unwrap_or(0);
        let height = self.height.unwrap_or(0);

        self.file.write_all(MAGIC)?;
        self.file.write_all(&self.frame_count.to_le_bytes())?;
        self.file.write_all(&width.to_le_bytes())?;
        self.file.write_all(&height.to_le_bytes())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        Ok(EncoderOutput {
            frame_count: self.frame_count,
            width,
            height,
        })
    }
}

/// Read back the trailer of a finalized segment file — used by readers
/// (e.g. frame-image retrieval) that need `frameCount`/`width`/`height`
/// without decoding every frame.
pub fn read_trailer(path: &Path) -> Result<EncoderOutput, EncoderErrorKind> {
    let mut file = File::open(path)?;
    let trailer_len = 4 + 4 + 4 + 4;
    let file_len = file.metadata()?.len();
    if file_len < trailer_len as u64 {
        return Err(EncoderErrorKind::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "segment file too small to contain a trailer",
        )));
    }

    file.seek(SeekFrom::End(-(trailer_len as i64)))?;
    let mut buf = [0u8; 16];
    std::io::Read::read_exact(&mut file, &mut buf)?;

    if &buf[0..4] != MAGIC {
        return Err(EncoderErrorKind::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad segment trailer magic",
        )));
    }

    let frame_count = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let width = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let height = u32::from_le_bytes(buf[12..16].try_into().unwrap());

    Ok(EncoderOutput {
        frame_count,
        width,
        height,
    })
}
