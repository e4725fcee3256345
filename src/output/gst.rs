//! GStreamer-backed file writer and live display.
//!
//! Both push RGB frames into an `appsrc`:
//! - file: `appsrc ! videoconvert ! x264enc ! h264parse ! <mux> ! filesink`
//! - display: `appsrc ! videoconvert ! autovideosink`

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::{FrameWriter, Presenter};
use crate::ingest::StreamProperties;

const EOS_TIMEOUT_SECS: u64 = 5;

/// An `appsrc`-fed pipeline with timestamps derived from the frame rate.
struct AppSrcPipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: gstreamer_app::AppSrc,
    frame_duration: gstreamer::ClockTime,
    frames_pushed: u64,
    running: bool,
}

impl AppSrcPipeline {
    fn launch(tail: &str, properties: StreamProperties, is_live: bool) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!("appsrc name=frame_src ! videoconvert ! {}", tail);
        let pipeline = gstreamer::parse::launch(&description)
            .context("build output pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("output pipeline is not a Pipeline"))?;
        let appsrc = pipeline
            .by_name("frame_src")
            .context("appsrc element missing from output pipeline")?
            .downcast::<gstreamer_app::AppSrc>()
            .map_err(|_| anyhow!("appsrc element has unexpected type"))?;

        let (num, den) = fps_fraction(properties.fps);
        let info = gstreamer_video::VideoInfo::builder(
            gstreamer_video::VideoFormat::Rgb,
            properties.width,
            properties.height,
        )
        .fps(gstreamer::Fraction::new(num, den))
        .build()
        .context("build output video info")?;
        let caps = info.to_caps().context("build output caps")?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gstreamer::Format::Time);
        appsrc.set_is_live(is_live);
        appsrc.set_stream_type(gstreamer_app::AppStreamType::Stream);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set output pipeline to Playing")?;

        let frame_ns = 1_000_000_000u64 * den as u64 / num.max(1) as u64;
        Ok(Self {
            pipeline,
            appsrc,
            frame_duration: gstreamer::ClockTime::from_nseconds(frame_ns),
            frames_pushed: 0,
            running: true,
        })
    }

    fn push(&mut self, image: &RgbImage) -> Result<()> {
        if !self.running {
            return Err(anyhow!("output pipeline is stopped"));
        }
        let mut buffer = gstreamer::Buffer::from_mut_slice(image.as_raw().clone());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(self.frame_duration * self.frames_pushed);
            buffer.set_duration(self.frame_duration);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|err| anyhow!("push frame into output pipeline: {:?}", err))?;
        self.frames_pushed += 1;
        self.check_bus()
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            if let gstreamer::MessageView::Error(err) = message.view() {
                return Err(anyhow!(
                    "output pipeline error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
        }
        Ok(())
    }

    /// Send EOS, wait for it to drain through the muxer, then stop.
    fn stop(&mut self, drain: bool) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let mut result = Ok(());
        if drain {
            if let Err(err) = self.appsrc.end_of_stream() {
                result = Err(anyhow!("signal end of output stream: {:?}", err));
            } else if let Some(bus) = self.pipeline.bus() {
                let message = bus.timed_pop_filtered(
                    gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
                    &[gstreamer::MessageType::Eos, gstreamer::MessageType::Error],
                );
                if let Some(message) = message {
                    if let gstreamer::MessageView::Error(err) = message.view() {
                        result = Err(anyhow!("output pipeline failed to drain: {}", err.error()));
                    }
                } else {
                    log::warn!("output pipeline did not drain within {}s", EOS_TIMEOUT_SECS);
                }
            }
        }
        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("set output pipeline to Null")?;
        result
    }
}

impl Drop for AppSrcPipeline {
    fn drop(&mut self) {
        if let Err(err) = self.stop(false) {
            log::debug!("output pipeline teardown: {:#}", err);
        }
    }
}

fn fps_fraction(fps: f64) -> (i32, i32) {
    if !fps.is_finite() || fps <= 0.0 {
        return (25, 1);
    }
    if (fps - fps.round()).abs() < 1e-3 {
        return (fps.round() as i32, 1);
    }
    ((fps * 1000.0).round() as i32, 1000)
}

/// H.264 file writer (`.mp4`, `.mkv`, `.mov`).
pub struct GstFileWriter {
    path: PathBuf,
    pipeline: Option<AppSrcPipeline>,
}

impl GstFileWriter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            pipeline: None,
        }
    }

    fn muxer(&self) -> &'static str {
        match self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("mkv") => "matroskamux",
            Some("mov") => "qtmux",
            _ => "mp4mux",
        }
    }
}

impl FrameWriter for GstFileWriter {
    fn begin(&mut self, properties: StreamProperties) -> Result<()> {
        let tail = format!(
            "x264enc tune=zerolatency ! h264parse ! {} ! filesink location=\"{}\"",
            self.muxer(),
            self.path.display()
        );
        self.pipeline = Some(AppSrcPipeline::launch(&tail, properties, false)?);
        log::info!(
            "output: writing {}x{} @ {:.1} fps to {}",
            properties.width,
            properties.height,
            properties.fps,
            self.path.display()
        );
        Ok(())
    }

    fn write(&mut self, image: &RgbImage) -> Result<()> {
        self.pipeline
            .as_mut()
            .ok_or_else(|| anyhow!("file writer used before begin"))?
            .push(image)
    }

    fn finish(&mut self) -> Result<()> {
        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.stop(true),
            None => Ok(()),
        }
    }
}

/// Live window via `autovideosink`.
#[derive(Default)]
pub struct GstDisplay {
    pipeline: Option<AppSrcPipeline>,
}

impl GstDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for GstDisplay {
    fn begin(&mut self, properties: StreamProperties) -> Result<()> {
        self.pipeline = Some(AppSrcPipeline::launch(
            "autovideosink sync=false",
            properties,
            true,
        )?);
        Ok(())
    }

    fn present(&mut self, image: &RgbImage) -> Result<()> {
        self.pipeline
            .as_mut()
            .ok_or_else(|| anyhow!("display used before begin"))?
            .push(image)
    }

    fn teardown(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            if let Err(err) = pipeline.stop(false) {
                log::warn!("display teardown: {:#}", err);
            }
        }
    }
}
