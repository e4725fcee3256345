//! YUV4MPEG2 file writer.
//!
//! Uncompressed 4:4:4 full-range BT.601 at the stream's native resolution and
//! frame rate. Every mainstream decoder reads it, and it needs no codec library.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::FrameWriter;
use crate::ingest::StreamProperties;

pub struct Y4mWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    geometry: Option<(u32, u32)>,
    plane: Vec<u8>,
}

impl Y4mWriter {
    /// Create (truncate) the output file. The header is written by `begin`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            geometry: None,
            plane: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameWriter for Y4mWriter {
    fn begin(&mut self, properties: StreamProperties) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("y4m writer already finished"))?;
        let (num, den) = frame_rate_fraction(properties.fps);
        writeln!(
            out,
            "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C444 XCOLORRANGE=FULL",
            properties.width, properties.height, num, den
        )
        .context("write y4m header")?;
        self.geometry = Some((properties.width, properties.height));
        log::info!(
            "output: writing {}x{} @ {}:{} fps to {}",
            properties.width,
            properties.height,
            num,
            den,
            self.path.display()
        );
        Ok(())
    }

    fn write(&mut self, image: &RgbImage) -> Result<()> {
        let geometry = self
            .geometry
            .ok_or_else(|| anyhow!("y4m writer used before begin"))?;
        if image.dimensions() != geometry {
            return Err(anyhow!(
                "frame is {}x{}, output is {}x{}",
                image.width(),
                image.height(),
                geometry.0,
                geometry.1
            ));
        }
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("y4m writer already finished"))?;

        let pixels = image.as_raw();
        let n = (geometry.0 * geometry.1) as usize;
        self.plane.resize(n * 3, 0);
        let (y_plane, rest) = self.plane.split_at_mut(n);
        let (u_plane, v_plane) = rest.split_at_mut(n);
        for (i, rgb) in pixels.chunks_exact(3).enumerate() {
            let (y, u, v) = rgb_to_yuv(rgb[0], rgb[1], rgb[2]);
            y_plane[i] = y;
            u_plane[i] = u;
            v_plane[i] = v;
        }

        out.write_all(b"FRAME\n").context("write y4m frame header")?;
        out.write_all(&self.plane).context("write y4m frame")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .with_context(|| format!("flush {}", self.path.display()))?;
        }
        Ok(())
    }
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

/// Integer rates stay exact (`25:1`); fractional ones keep millihertz precision.
fn frame_rate_fraction(fps: f64) -> (u64, u64) {
    if !fps.is_finite() || fps <= 0.0 {
        return (25, 1);
    }
    if (fps - fps.round()).abs() < 1e-3 {
        return (fps.round() as u64, 1);
    }
    ((fps * 1000.0).round() as u64, 1000)
}
