//! RTSP capture backends.
//!
//! `RtspConnector` picks a backend from the URI:
//! - `stub://...` opens a synthetic stream (tests, demos)
//! - anything else uses GStreamer (feature `rtsp-gstreamer`) or, failing that,
//!   FFmpeg (feature `rtsp-ffmpeg`)
//!
//! The synthetic stream understands two query parameters:
//! - `fail_after=N`: the connection drops after N frames (reconnects get a fresh N)
//! - `unreachable`: every connect attempt fails

use anyhow::{anyhow, Result};
use chrono::Local;

use super::{CaptureOptions, CaptureStream, Connector, StreamProperties};
use crate::frame::Frame;

#[cfg(feature = "rtsp-ffmpeg")]
use super::rtsp_ffmpeg::FfmpegRtspStream;
#[cfg(feature = "rtsp-gstreamer")]
use super::rtsp_gstreamer::GstreamerRtspStream;

/// Connector for RTSP cameras.
#[derive(Clone, Copy, Debug, Default)]
pub struct RtspConnector;

impl RtspConnector {
    pub fn new() -> Self {
        Self
    }
}

/// An open RTSP connection.
pub enum RtspStream {
    Synthetic(SyntheticRtspStream),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspStream),
    #[cfg(feature = "rtsp-ffmpeg")]
    Ffmpeg(FfmpegRtspStream),
}

impl Connector for RtspConnector {
    type Stream = RtspStream;

    fn connect(&mut self, uri: &str, options: &CaptureOptions) -> Result<RtspStream> {
        if uri.starts_with("stub://") {
            return Ok(RtspStream::Synthetic(SyntheticRtspStream::connect(
                uri, options,
            )?));
        }

        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(RtspStream::Gstreamer(GstreamerRtspStream::connect(
                uri, options,
            )?))
        }
        #[cfg(all(not(feature = "rtsp-gstreamer"), feature = "rtsp-ffmpeg"))]
        {
            Ok(RtspStream::Ffmpeg(FfmpegRtspStream::connect(uri, options)?))
        }
        #[cfg(not(any(feature = "rtsp-gstreamer", feature = "rtsp-ffmpeg")))]
        {
            let _ = options;
            Err(anyhow!(
                "RTSP requires the rtsp-gstreamer or rtsp-ffmpeg feature"
            ))
        }
    }
}

impl CaptureStream for RtspStream {
    fn read(&mut self) -> Result<Option<Frame>> {
        match self {
            RtspStream::Synthetic(stream) => stream.read(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspStream::Gstreamer(stream) => stream.read(),
            #[cfg(feature = "rtsp-ffmpeg")]
            RtspStream::Ffmpeg(stream) => stream.read(),
        }
    }

    fn properties(&self) -> StreamProperties {
        match self {
            RtspStream::Synthetic(stream) => stream.properties(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspStream::Gstreamer(stream) => stream.properties(),
            #[cfg(feature = "rtsp-ffmpeg")]
            RtspStream::Ffmpeg(stream) => stream.properties(),
        }
    }

    fn close(&mut self) {
        match self {
            RtspStream::Synthetic(stream) => stream.close(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspStream::Gstreamer(stream) => stream.close(),
            #[cfg(feature = "rtsp-ffmpeg")]
            RtspStream::Ffmpeg(stream) => stream.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

pub struct SyntheticRtspStream {
    width: u32,
    height: u32,
    fps: f64,
    frame_bytes: usize,
    frame_count: u64,
    fail_after: Option<u64>,
    open: bool,
}

impl SyntheticRtspStream {
    fn connect(uri: &str, options: &CaptureOptions) -> Result<Self> {
        let parsed = url::Url::parse(uri).map_err(|e| anyhow!("invalid stub uri: {}", e))?;
        let mut fail_after = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "unreachable" => return Err(anyhow!("synthetic source is unreachable")),
                "fail_after" => {
                    fail_after = Some(value.parse::<u64>().map_err(|_| {
                        anyhow!("fail_after must be an integer frame count")
                    })?)
                }
                _ => {}
            }
        }
        let frame_bytes = (options.width as usize)
            .checked_mul(options.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| {
                anyhow!(
                    "synthetic frame size {}x{} overflows",
                    options.width,
                    options.height
                )
            })?;
        log::debug!("RtspSource: connected to {} (synthetic)", super::redact_uri(uri));
        Ok(Self {
            width: options.width,
            height: options.height,
            fps: options.fallback_fps,
            frame_bytes,
            frame_count: 0,
            fail_after,
            open: true,
        })
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("synthetic stream is closed"));
        }
        if self.fail_after.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::from_rgb_at(pixels, self.width, self.height, Local::now()).map(Some)
    }

    /// Diagonal gradient that drifts one step per frame.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.width as u64;
        let mut pixels = vec![0u8; self.frame_bytes];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i as u64 % width;
            let y = i as u64 / width;
            let v = ((x + y + self.frame_count) % 256) as u8;
            px[0] = v;
            px[1] = v / 2;
            px[2] = 255 - v;
        }
        pixels
    }

    fn properties(&self) -> StreamProperties {
        StreamProperties {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}
