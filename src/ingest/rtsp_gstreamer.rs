//! RTSP capture using GStreamer.
//!
//! Pipeline: `rtspsrc ! <depay/parse/decode for the codec hint> ! videoconvert ! appsink`.
//! The appsink keeps at most `buffer_frames` samples and drops older ones, so a
//! slow consumer always sees the newest frame.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::{Duration, Instant};

use super::{CaptureOptions, StreamProperties};
use crate::frame::Frame;

pub struct GstreamerRtspStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    properties: StreamProperties,
    read_timeout: Duration,
    /// First sample, pulled during connect to learn the native caps.
    pending: Option<Frame>,
    last_error: Option<String>,
    last_frame_at: Option<Instant>,
    open: bool,
}

impl GstreamerRtspStream {
    pub(crate) fn connect(uri: &str, options: &CaptureOptions) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! {} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers={} drop=true",
            uri,
            decode_chain(&options.codec_hint),
            options.buffer_frames.max(1)
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(options.buffer_frames.max(1));
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        let mut stream = Self {
            pipeline,
            appsink,
            properties: StreamProperties {
                width: options.width,
                height: options.height,
                fps: options.fallback_fps,
            },
            read_timeout: options.read_timeout,
            pending: None,
            last_error: None,
            last_frame_at: None,
            open: true,
        };

        // An unreachable camera never produces a first sample; fail the open instead
        // of letting the first read burn a reconnect attempt.
        let first = match stream.pull(options.fallback_fps) {
            Ok(first) => first,
            Err(err) => {
                stream.close();
                return Err(err.context("RTSP stream produced no initial frame"));
            }
        };
        stream.pending = Some(first);
        Ok(stream)
    }

    pub(crate) fn read(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        if !self.open {
            return Err(anyhow!("RTSP stream is closed"));
        }
        self.poll_bus();
        if let Some(err) = self.last_error.take() {
            if err.contains("EOS") {
                return Ok(None);
            }
            return Err(anyhow!(err));
        }
        if self.appsink.is_eos() {
            return Ok(None);
        }
        self.pull(self.properties.fps).map(Some)
    }

    pub(crate) fn properties(&self) -> StreamProperties {
        self.properties
    }

    pub(crate) fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.pending = None;
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("RTSP pipeline teardown reported {:?}", err);
        }
    }

    fn pull(&mut self, fallback_fps: f64) -> Result<Frame> {
        let timeout = gstreamer::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height, fps) = sample_to_pixels(&sample)?;
        self.properties = StreamProperties {
            width,
            height,
            fps: fps.unwrap_or(fallback_fps),
        };
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(pixels, width, height)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

impl Drop for GstreamerRtspStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_chain(codec_hint: &str) -> &'static str {
    match codec_hint.to_ascii_uppercase().as_str() {
        "H264" | "AVC" => "rtph264depay ! h264parse ! avdec_h264",
        "H265" | "HEVC" => "rtph265depay ! h265parse ! avdec_h265",
        _ => "decodebin",
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32, Option<f64>)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let fps = info.fps();
    let fps = (fps.numer() > 0 && fps.denom() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("RTSP buffer is shorter than its caps")?
            .to_vec();
        return Ok((pixels, width, height, fps));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height, fps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_hint_selects_decode_chain() {
        assert!(decode_chain("H264").contains("avdec_h264"));
        assert!(decode_chain("hevc").contains("avdec_h265"));
        assert_eq!(decode_chain("MJPG"), "decodebin");
    }
}
