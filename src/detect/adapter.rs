//! Boundary between the pipeline and the external detector.

use std::panic::{self, AssertUnwindSafe};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, RawDetection};
use crate::error::{panic_message, PipelineError};
use crate::frame::Frame;

/// Calls the detector and normalises its output.
///
/// Any per-frame failure (an error or a panic inside the detector) is logged and
/// turned into an empty detection list, so one bad frame never ends the stream.
/// The adapter is constructed by the caller and lent to the pipeline; there is
/// no process-wide detector.
pub struct DetectionAdapter {
    detector: Box<dyn Detector>,
    min_confidence: f32,
    calls: u64,
    failures: u64,
}

impl DetectionAdapter {
    pub fn new(detector: impl Detector + 'static) -> Self {
        Self::from_boxed(Box::new(detector))
    }

    pub fn from_boxed(detector: Box<dyn Detector>) -> Self {
        Self {
            detector,
            min_confidence: 0.0,
            calls: 0,
            failures: 0,
        }
    }

    /// Drop detections scoring below `threshold`.
    pub fn with_min_confidence(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.detector.warm_up()
    }

    /// Detect objects on one frame. Never fails.
    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        self.calls += 1;
        match self.try_detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.failures += 1;
                log::warn!("error processing frame {}: {}", self.calls, err);
                Vec::new()
            }
        }
    }

    fn try_detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, PipelineError> {
        let detector = &mut self.detector;
        let raw = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame)))
            .map_err(|payload| {
                PipelineError::Detection(format!(
                    "detector panicked: {}",
                    panic_message(payload.as_ref())
                ))
            })?
            .map_err(|err| PipelineError::Detection(format!("{:#}", err)))?;
        let (width, height) = (frame.width(), frame.height());
        Ok(raw
            .into_iter()
            .filter_map(|det| self.normalize(det, width, height))
            .collect())
    }

    /// Boxes are truncated to whole pixels and clipped to the frame.
    fn normalize(&self, raw: RawDetection, width: u32, height: u32) -> Option<Detection> {
        let coords = [raw.x1, raw.y1, raw.x2, raw.y2, raw.confidence];
        if coords.iter().any(|v| !v.is_finite()) {
            log::debug!("dropping non-finite detection {:?}", raw);
            return None;
        }
        if raw.confidence < self.min_confidence {
            return None;
        }
        let bbox = BoundingBox::new(
            raw.x1 as i32,
            raw.y1 as i32,
            raw.x2 as i32,
            raw.y2 as i32,
        )
        .clamped(width, height);
        Some(Detection::new(bbox, raw.confidence, raw.class_id))
    }

    /// Frames handed to the detector so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Frames on which the detector failed.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}
