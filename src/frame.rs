//! Camera frames.
//!
//! - `Frame`: owned RGB8 pixels plus capture metadata, produced by `ingest` sources.
//! - Resizing to the detector's working resolution.
//! - JPEG encoding for backends that ship frames over HTTP.
//!
//! A frame with no pixel data is a valid value: some streams report a successful
//! read while handing back nothing usable. Consumers check `is_empty()` and treat
//! it as a dead stream.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use std::fmt;
use std::time::{Duration, Instant};

/// JPEG quality used when a frame leaves the process for inference.
pub const UPLOAD_JPEG_QUALITY: u8 = 85;

pub struct Frame {
    /// Packed RGB8, row-major, `width * height * 3` bytes.
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source capture counter, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// A frame that carries no pixel data.
    pub fn empty(sequence: u64) -> Self {
        Self::new(Vec::new(), 0, 0, sequence)
    }

    pub fn from_rgb_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, sequence)
    }

    /// Decode a JPEG (or any format the `image` build supports) into a frame.
    pub fn decode(bytes: &[u8], sequence: u64) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode frame image")?;
        Ok(Self::from_rgb_image(image.into_rgb8(), sequence))
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() || self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Copy the pixels into an `RgbImage`. Fails when the buffer does not match
    /// the declared dimensions.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} RGB",
                self.sequence,
                self.pixels.len(),
                expected_len(self.width, self.height),
                self.width,
                self.height
            )
        })
    }

    /// Resize to `width`x`height`. A frame already at that size is returned as-is.
    pub fn resized(self, width: u32, height: u32) -> Result<Self> {
        if self.width == width && self.height == height {
            return Ok(self);
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize frame to {}x{}", width, height));
        }
        let image = self.to_rgb_image()?;
        let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Ok(Self {
            pixels: resized.into_raw(),
            width,
            height,
            sequence: self.sequence,
            captured_at: self.captured_at,
        })
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let image = self.to_rgb_image()?;
        let mut out = Vec::with_capacity(self.pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&image)
            .context("encode frame as jpeg")?;
        Ok(out)
    }
}

impl fmt::Debug for Frame {
    // Pixel data is deliberately left out of debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> usize {
    (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey_frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![128u8; expected_len(width, height)], width, height, 1)
    }

    #[test]
    fn empty_frame_reports_empty() {
        assert!(Frame::empty(3).is_empty());
        assert!(Frame::new(vec![0u8; 3], 0, 1, 1).is_empty());
        assert!(!grey_frame(2, 2).is_empty());
    }

    #[test]
    fn resize_changes_dimensions_and_buffer() {
        let frame = grey_frame(64, 48).resized(32, 18).unwrap();
        assert_eq!((frame.width, frame.height), (32, 18));
        assert_eq!(frame.pixels().len(), 32 * 18 * 3);
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let frame = Frame::new(vec![0u8; 10], 4, 4, 7);
        assert!(frame.to_rgb_image().is_err());
        assert!(frame.encode_jpeg(UPLOAD_JPEG_QUALITY).is_err());
    }

    #[test]
    fn jpeg_encode_decodes_back_to_same_size() {
        let frame = grey_frame(16, 8);
        let jpeg = frame.encode_jpeg(UPLOAD_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::decode(&jpeg, 2).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 8));
    }
}
