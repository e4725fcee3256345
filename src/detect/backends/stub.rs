use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Stub detector for tests and demos.
///
/// Either replays a fixed detection list on every frame, or (in demo mode)
/// produces a person walking across the frame, a dog on every third frame and a
/// car that the category table ignores.
pub struct StubDetector {
    fixed: Option<Vec<RawDetection>>,
    calls: u64,
}

impl StubDetector {
    /// Detector that never finds anything.
    pub fn new() -> Self {
        Self {
            fixed: Some(Vec::new()),
            calls: 0,
        }
    }

    /// Detector that returns `detections` for every frame.
    pub fn with_detections(detections: Vec<RawDetection>) -> Self {
        Self {
            fixed: Some(detections),
            calls: 0,
        }
    }

    /// Moving synthetic scene.
    pub fn demo() -> Self {
        Self {
            fixed: None,
            calls: 0,
        }
    }

    fn demo_scene(&self, width: f32, height: f32) -> Vec<RawDetection> {
        let box_w = (width / 6.0).max(8.0);
        let box_h = (height / 2.5).max(8.0);
        let travel = (width - box_w).max(1.0);
        let x = (self.calls as f32 * 7.0) % travel;
        let y = height * 0.3;

        let mut detections = vec![
            RawDetection {
                x1: x,
                y1: y,
                x2: x + box_w,
                y2: y + box_h,
                confidence: 0.87,
                class_id: 0,
            },
            RawDetection {
                x1: width * 0.05,
                y1: height * 0.75,
                x2: width * 0.3,
                y2: height * 0.95,
                confidence: 0.64,
                class_id: 2,
            },
        ];
        if self.calls % 3 == 0 {
            detections.push(RawDetection {
                x1: width * 0.6,
                y1: height * 0.6,
                x2: width * 0.8,
                y2: height * 0.85,
                confidence: 0.71,
                class_id: 16,
            });
        }
        detections
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        match &self.fixed {
            Some(detections) => Ok(detections.clone()),
            None => Ok(self.demo_scene(frame.width() as f32, frame.height() as f32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stub_replays_detections() -> Result<()> {
        let det = RawDetection {
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
            confidence: 0.5,
            class_id: 0,
        };
        let mut stub = StubDetector::with_detections(vec![det.clone()]);
        let frame = Frame::filled(8, 8, [0, 0, 0]);
        assert_eq!(stub.detect(&frame)?, vec![det.clone()]);
        assert_eq!(stub.detect(&frame)?, vec![det]);
        Ok(())
    }

    #[test]
    fn demo_scene_stays_inside_frame() -> Result<()> {
        let mut stub = StubDetector::demo();
        let frame = Frame::filled(320, 240, [0, 0, 0]);
        for _ in 0..100 {
            for det in stub.detect(&frame)? {
                assert!(det.x1 >= 0.0 && det.x2 <= 320.0);
                assert!(det.y1 >= 0.0 && det.y2 <= 240.0);
            }
        }
        Ok(())
    }
}
