use serde::Serialize;

/// COCO class id for a person.
pub const PERSON_CLASS_ID: u32 = 0;
/// COCO class ids treated as animals: bird, cat, dog, horse, sheep, cow, elephant.
pub const ANIMAL_CLASS_IDS: [u32; 7] = [16, 17, 18, 19, 20, 21, 22];

/// Detector output before normalisation.
///
/// Box corners are in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

/// Integer pixel box with `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }

    /// Clip to a `width` x `height` raster.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX);
        Self {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        }
    }
}

/// Coarse bucket a class id falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DetectionCategory {
    Person,
    Animal,
    Ignored,
}

impl DetectionCategory {
    pub fn from_class_id(class_id: u32) -> Self {
        if class_id == PERSON_CLASS_ID {
            Self::Person
        } else if ANIMAL_CLASS_IDS.contains(&class_id) {
            Self::Animal
        } else {
            Self::Ignored
        }
    }

    /// Name used in overlay labels.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Animal => "Animal",
            Self::Ignored => "Ignored",
        }
    }

    pub fn is_drawn(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// One normalised detection for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub class_id: u32,
    pub category: DetectionCategory,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            class_id,
            category: DetectionCategory::from_class_id(class_id),
        }
    }

    /// Overlay label, e.g. `Person 0.87`.
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.category.label(), self.confidence)
    }
}

/// Per-frame person/animal totals. Recomputed every frame, never accumulated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub persons: usize,
    pub animals: usize,
}

impl RunSummary {
    pub fn from_detections(detections: &[Detection]) -> Self {
        detections
            .iter()
            .fold(Self::default(), |mut summary, det| {
                match det.category {
                    DetectionCategory::Person => summary.persons += 1,
                    DetectionCategory::Animal => summary.animals += 1,
                    DetectionCategory::Ignored => {}
                }
                summary
            })
    }
}
