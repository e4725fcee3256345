//! Object detection boundary.
//!
//! - `Detector`: the external detector (frame in, raw boxes out)
//! - `DetectionAdapter`: absorbs per-frame detector failures and normalises output
//! - `DetectionCategory`: the fixed class-id table (Person / Animal / Ignored)

mod adapter;
mod backend;
pub mod backends;
mod result;

pub use adapter::DetectionAdapter;
pub use backend::Detector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use result::{
    BoundingBox, Detection, DetectionCategory, RawDetection, RunSummary, ANIMAL_CLASS_IDS,
    PERSON_CLASS_ID,
};
