//! Frame ingestion.
//!
//! This module provides the capture boundary for live network video:
//! - `Connector` / `CaptureStream`: the narrow open/read/close interface a
//!   capture backend implements
//! - `RtspConnector`: RTSP backends (GStreamer, FFmpeg) plus a synthetic
//!   `stub://` source for tests and demos
//! - `StreamSource`: owns the single live connection, detects read failures and
//!   reconnects with a bounded number of attempts
//!
//! Backends are configured for minimal internal buffering so that a read returns
//! the most recent frame rather than a queue of stale ones.

mod rtsp;
#[cfg(feature = "rtsp-ffmpeg")]
mod rtsp_ffmpeg;
#[cfg(feature = "rtsp-gstreamer")]
mod rtsp_gstreamer;
pub mod source;

use anyhow::Result;
use std::time::Duration;

use crate::frame::Frame;

pub use rtsp::{RtspConnector, RtspStream};
pub use source::{Reconnect, ReconnectPolicy, Sleeper, StreamSource, ThreadSleeper};

/// Connection parameters handed to a capture backend on every (re)open.
#[derive(Clone, Debug)]
pub struct CaptureOptions {
    /// Internal buffer depth in frames. Small values trade completeness for latency.
    pub buffer_frames: u32,
    /// Forced codec hint (e.g. "H264"). Backends that cannot force a codec log a mismatch.
    pub codec_hint: String,
    /// How long a single read may block before it counts as a transport failure.
    pub read_timeout: Duration,
    /// Raster size used by the synthetic source.
    pub width: u32,
    pub height: u32,
    /// Frame rate reported when the source does not advertise one.
    pub fallback_fps: f64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            buffer_frames: 2,
            codec_hint: "H264".to_string(),
            read_timeout: Duration::from_secs(5),
            width: 640,
            height: 480,
            fallback_fps: 25.0,
        }
    }
}

/// Native properties of an opened stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamProperties {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// One open connection to a video source.
pub trait CaptureStream {
    /// Read the next frame.
    ///
    /// `Ok(None)` is end-of-stream; `Err` is a transport error. Both are read failures
    /// from the pipeline's point of view.
    fn read(&mut self) -> Result<Option<Frame>>;

    fn properties(&self) -> StreamProperties;

    /// Release the connection. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens connections to a video source.
pub trait Connector {
    type Stream: CaptureStream;

    /// Open the source. Fails fast when the source cannot be reached at all.
    fn connect(&mut self, uri: &str, options: &CaptureOptions) -> Result<Self::Stream>;
}

/// Strip credentials from a stream URI before it reaches a log line.
pub fn redact_uri(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(mut parsed) => {
            if parsed.password().is_none() && parsed.username().is_empty() {
                return uri.to_string();
            }
            // Non-special schemes may refuse credential edits; fall back to the host.
            if parsed.set_password(None).is_err() || parsed.set_username("***").is_err() {
                return format!(
                    "{}://***@{}",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or("unknown")
                );
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable uri>".to_string(),
    }
}
