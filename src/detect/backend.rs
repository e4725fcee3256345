use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// External object detector.
///
/// # Contract
///
/// - Called synchronously, one frame at a time, from a single thread.
/// - Reusable across sequential calls; not required to support concurrent calls.
/// - Must treat the frame as read-only.
/// - Returns boxes in the frame's pixel coordinates with raw class ids.
///
/// Errors are per-frame: the detection adapter logs them and treats the frame
/// as having no detections.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
