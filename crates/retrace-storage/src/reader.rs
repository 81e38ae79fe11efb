//! Reading frames back out of a finalized [`crate::JpegContainerEncoder`]
//! segment file. There's no frame index beyond the trailer, so a read is a
//! sequential scan — fine for a single-user local store where reads are
//! rare relative to writes (spec.md §4.1, frame-image retrieval).

use image::DynamicImage;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("frame index {0} out of range")]
    IndexOutOfRange(u32),
    #[error("corrupt segment file: {0}")]
    Corrupt(String),
    #[error("JPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode the frame at `index` (0-based, in append order) out of `path`.
pub fn read_frame_at(path: &Path, index: u32) -> Result<DynamicImage, ReadError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut current = 0u32;
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ReadError::IndexOutOfRange(index));
            }
            Err(e) => return Err(ReadError::Io(e)),
        }
        let len = u32::from_le_bytes(len_buf);

        // The trailer starts with the same 4-byte-length shape as a frame
        // record would, but its magic never matches a plausible JPEG SOI
        // marker length; in practice we stop once we've served every frame
        // the caller asked for, so the trailer is never parsed as a frame.
        if current == index {
            let mut jpeg_bytes = vec![0u8; len as usize];
            reader.read_exact(&mut jpeg_bytes)?;
            return Ok(image::load_from_memory(&jpeg_bytes)?);
        }

        reader.seek_relative(len as i64)?;
        current += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::JpegContainerEncoder;
    use crate::{FrameEncoder, NewEncoder};
    use image::{DynamicImage, RgbImage};

    fn img(w: u32, h: u32, shade: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([shade, shade, shade])))
    }

    #[test]
    fn reads_each_frame_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("segment");
        let mut enc = JpegContainerEncoder::create(&path).unwrap();
        enc.append(&img(4, 4, 10)).unwrap();
        enc.append(&img(4, 4, 200)).unwrap();
        enc.finalize().unwrap();

        let first = read_frame_at(&path, 0).unwrap();
        let second = read_frame_at(&path, 1).unwrap();
        assert_eq!(first.width(), 4);
        assert_eq!(second.width(), 4);
    }

    #[test]
    fn out_of_range_index_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("segment");
        let mut enc = JpegContainerEncoder::create(&path).unwrap();
        enc.append(&img(2, 2, 1)).unwrap();
        enc.finalize().unwrap();

        let err = read_frame_at(&path, 5).unwrap_err();
        assert!(matches!(err, ReadError::IndexOutOfRange(5)));
    }
}
