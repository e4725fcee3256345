//! Output of annotated frames.
//!
//! - `FrameWriter`: persists frames to a video file (`.y4m` always, `.mp4`/`.mkv`/`.mov`
//!   with the `rtsp-gstreamer` feature)
//! - `Presenter`: live display surface (`rtsp-gstreamer` feature)
//! - `OutputSink`: owns both for the run and guarantees they are released once
//!
//! Writes happen inline on the pipeline thread; there is no queue between the
//! pipeline and the sink.

#[cfg(feature = "rtsp-gstreamer")]
mod gst;
mod y4m;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::path::Path;

use crate::error::PipelineError;
use crate::frame::AnnotatedFrame;
use crate::ingest::StreamProperties;

#[cfg(feature = "rtsp-gstreamer")]
pub use gst::{GstDisplay, GstFileWriter};
pub use y4m::Y4mWriter;

/// Persists frames at a fixed resolution and frame rate.
pub trait FrameWriter {
    /// Called once, before the first frame, with the stream's native properties.
    fn begin(&mut self, properties: StreamProperties) -> Result<()>;

    fn write(&mut self, image: &RgbImage) -> Result<()>;

    /// Flush and close. Must be safe to call more than once.
    fn finish(&mut self) -> Result<()>;
}

/// Live display surface.
pub trait Presenter {
    fn begin(&mut self, properties: StreamProperties) -> Result<()>;

    fn present(&mut self, image: &RgbImage) -> Result<()>;

    /// Tear the surface down. Must be safe to call more than once.
    fn teardown(&mut self);
}

/// Pick a file writer from the output path's extension.
pub fn open_writer(path: &Path) -> Result<Box<dyn FrameWriter>> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "y4m" => Ok(Box::new(Y4mWriter::create(path)?)),
        #[cfg(feature = "rtsp-gstreamer")]
        "mp4" | "mkv" | "mov" => Ok(Box::new(GstFileWriter::new(path))),
        #[cfg(not(feature = "rtsp-gstreamer"))]
        "mp4" | "mkv" | "mov" => Err(anyhow!(
            "writing .{} requires the rtsp-gstreamer feature (use .y4m instead)",
            ext
        )),
        _ => Err(anyhow!(
            "unsupported output extension for {} (expected .y4m, .mp4, .mkv or .mov)",
            path.display()
        )),
    }
}

/// Open the live display surface.
pub fn open_display() -> Result<Box<dyn Presenter>> {
    #[cfg(feature = "rtsp-gstreamer")]
    {
        Ok(Box::new(GstDisplay::new()))
    }
    #[cfg(not(feature = "rtsp-gstreamer"))]
    {
        Err(anyhow!("live display requires the rtsp-gstreamer feature"))
    }
}

/// Optional file writer plus optional live display.
pub struct OutputSink {
    writer: Option<Box<dyn FrameWriter>>,
    presenter: Option<Box<dyn Presenter>>,
    properties: Option<StreamProperties>,
    frames_written: u64,
    frames_presented: u64,
    closed: bool,
}

impl OutputSink {
    pub fn new(
        writer: Option<Box<dyn FrameWriter>>,
        presenter: Option<Box<dyn Presenter>>,
    ) -> Self {
        Self {
            writer,
            presenter,
            properties: None,
            frames_written: 0,
            frames_presented: 0,
            closed: false,
        }
    }

    /// Sink that discards everything.
    pub fn none() -> Self {
        Self::new(None, None)
    }

    /// Fix the output geometry from the first opened stream. Later calls are ignored.
    pub fn start(&mut self, properties: StreamProperties) -> Result<(), PipelineError> {
        if self.properties.is_some() || self.closed {
            return Ok(());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.begin(properties).map_err(PipelineError::output)?;
        }
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.begin(properties).map_err(PipelineError::output)?;
        }
        self.properties = Some(properties);
        Ok(())
    }

    /// Persist one frame (no-op without a writer).
    pub fn write(&mut self, frame: &AnnotatedFrame) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::Output("sink is closed".to_string()));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let image = conform(frame, self.properties);
        writer.write(&image).map_err(PipelineError::output)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Show one frame on the live surface (no-op without a display).
    pub fn present(&mut self, frame: &AnnotatedFrame) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::Output("sink is closed".to_string()));
        }
        let Some(presenter) = self.presenter.as_mut() else {
            return Ok(());
        };
        let image = conform(frame, self.properties);
        presenter.present(&image).map_err(PipelineError::output)?;
        self.frames_presented += 1;
        Ok(())
    }

    /// Finish the file and tear down the display. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), PipelineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.teardown();
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.finish().map_err(PipelineError::output)?;
            log::info!("output: {} frames written", self.frames_written);
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("output close failed: {}", err);
        }
    }
}

/// Frames from a reconnect at a different resolution are scaled to the output geometry.
fn conform(
    frame: &AnnotatedFrame,
    properties: Option<StreamProperties>,
) -> std::borrow::Cow<'_, RgbImage> {
    let image = frame.frame().image();
    match properties {
        Some(p) if p.width != image.width() || p.height != image.height() => {
            std::borrow::Cow::Owned(image::imageops::resize(
                image,
                p.width,
                p.height,
                image::imageops::FilterType::Triangle,
            ))
        }
        _ => std::borrow::Cow::Borrowed(image),
    }
}
