//! Frames flowing through the pipeline.
//!
//! - `Frame`: a fixed-resolution RGB raster plus the wall-clock time it was captured.
//! - `AnnotatedFrame`: the same raster after the overlay was drawn onto it, together
//!   with a record of what was drawn.
//!
//! A frame is produced by the capture layer, read by the scheduler and the detector,
//! and consumed by the annotator which mutates the raster in place.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::RgbImage;

use crate::annotate::Overlay;

/// Raw RGB frame as delivered by a capture backend.
pub struct Frame {
    image: RgbImage,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Build a frame from tightly packed RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::from_rgb_at(pixels, width, height, Local::now())
    }

    pub fn from_rgb_at(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Local>,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
        Ok(Self { image, captured_at })
    }

    /// A uniformly filled frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
            captured_at: Local::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Tightly packed RGB24 bytes, row-major.
    pub fn as_rgb(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// A frame with the detection overlay applied.
///
/// Same raster identity as the source `Frame`; `overlay` records every box and
/// text item that was drawn.
#[derive(Debug)]
pub struct AnnotatedFrame {
    frame: Frame,
    pub overlay: Overlay,
}

impl AnnotatedFrame {
    pub(crate) fn new(frame: Frame, overlay: Overlay) -> Self {
        Self { frame, overlay }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn as_rgb(&self) -> &[u8] {
        self.frame.as_rgb()
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_short_buffers() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4).unwrap_err();
        assert!(err.to_string().contains("expected 48 RGB bytes"));
    }

    #[test]
    fn frame_exposes_dimensions_and_pixels() -> Result<()> {
        let frame = Frame::from_rgb(vec![7u8; 2 * 3 * 3], 2, 3)?;
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.as_rgb().len(), 18);
        assert!(frame.as_rgb().iter().all(|&b| b == 7));
        Ok(())
    }
}
