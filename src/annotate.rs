//! Detection overlay.
//!
//! `Annotator::annotate` draws, for every Person/Animal detection, a box in the
//! category colour with a `"<Category> <conf>"` label; then the per-frame person
//! and animal totals and the capture timestamp. Ignored detections draw nothing.
//!
//! Drawing is pure: no I/O, no clock reads (the timestamp comes from the frame).
//! Every drawn element is also recorded in an `Overlay` so callers can inspect
//! what was rendered. Text uses the bundled DejaVu Sans unless another font is
//! supplied.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{BoundingBox, Detection, DetectionCategory, RunSummary};
use crate::frame::{AnnotatedFrame, Frame};

pub const PERSON_COLOR: [u8; 3] = [0, 255, 0];
pub const ANIMAL_COLOR: [u8; 3] = [0, 0, 255];
pub const PERSON_COUNT_COLOR: [u8; 3] = [255, 0, 0];
pub const ANIMAL_COUNT_COLOR: [u8; 3] = [0, 0, 255];
pub const TIMESTAMP_COLOR: [u8; 3] = [255, 255, 255];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOX_THICKNESS: i32 = 2;
const LABEL_PX: f32 = 15.0;
const COUNTER_PX: f32 = 30.0;
const TIMESTAMP_PX: f32 = 18.0;
const LABEL_OFFSET: i32 = 10;

static DEFAULT_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// A box that was drawn onto the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawnBox {
    pub bbox: BoundingBox,
    pub category: DetectionCategory,
    pub color: [u8; 3],
    pub label: String,
}

/// A text item; `(x, baseline)` is the bottom-left of the text.
#[derive(Clone, Debug, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub x: i32,
    pub baseline: i32,
    pub px: f32,
    pub color: [u8; 3],
}

/// Record of everything drawn on one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub boxes: Vec<DrawnBox>,
    pub texts: Vec<TextItem>,
    pub summary: RunSummary,
    pub timestamp: String,
}

impl Overlay {
    pub fn text(&self, needle: &str) -> Option<&TextItem> {
        self.texts.iter().find(|item| item.text.starts_with(needle))
    }
}

pub fn category_color(category: DetectionCategory) -> Option<[u8; 3]> {
    match category {
        DetectionCategory::Person => Some(PERSON_COLOR),
        DetectionCategory::Animal => Some(ANIMAL_COLOR),
        DetectionCategory::Ignored => None,
    }
}

fn default_font() -> Option<FontArc> {
    match FontArc::try_from_slice(DEFAULT_FONT) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("bundled overlay font unusable, text will not be drawn: {}", err);
            None
        }
    }
}

#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    /// Annotator drawing text with the bundled font.
    pub fn new() -> Self {
        Self {
            font: default_font(),
        }
    }

    /// Boxes only; text is recorded in the `Overlay` but not rasterised.
    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font for overlay text.
    pub fn from_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        Ok(Self::with_font(font))
    }

    pub fn renders_text(&self) -> bool {
        self.font.is_some()
    }

    pub fn annotate(&self, mut frame: Frame, detections: &[Detection]) -> AnnotatedFrame {
        let mut overlay = Overlay {
            summary: RunSummary::from_detections(detections),
            timestamp: frame.captured_at.format(TIMESTAMP_FORMAT).to_string(),
            ..Overlay::default()
        };

        for det in detections {
            let Some(color) = category_color(det.category) else {
                continue;
            };
            let label = det.label();
            self.draw_box(&mut frame, det.bbox, color);
            let item = TextItem {
                text: label.clone(),
                x: det.bbox.x1,
                baseline: det.bbox.y1 - LABEL_OFFSET,
                px: LABEL_PX,
                color,
            };
            self.draw_text(&mut frame, &item);
            overlay.texts.push(item);
            overlay.boxes.push(DrawnBox {
                bbox: det.bbox,
                category: det.category,
                color,
                label,
            });
        }

        let height = frame.height() as i32;
        let fixed = [
            TextItem {
                text: format!("Persons Detected: {}", overlay.summary.persons),
                x: 10,
                baseline: 30,
                px: COUNTER_PX,
                color: PERSON_COUNT_COLOR,
            },
            TextItem {
                text: format!("Animals Detected: {}", overlay.summary.animals),
                x: 10,
                baseline: 70,
                px: COUNTER_PX,
                color: ANIMAL_COUNT_COLOR,
            },
            TextItem {
                text: overlay.timestamp.clone(),
                x: 10,
                baseline: height - 20,
                px: TIMESTAMP_PX,
                color: TIMESTAMP_COLOR,
            },
        ];
        for item in fixed {
            self.draw_text(&mut frame, &item);
            overlay.texts.push(item);
        }

        AnnotatedFrame::new(frame, overlay)
    }

    fn draw_box(&self, frame: &mut Frame, bbox: BoundingBox, color: [u8; 3]) {
        let bbox = bbox.clamped(frame.width(), frame.height());
        let image = frame.image_mut();
        for inset in 0..BOX_THICKNESS {
            let width = bbox.width() as i32 - 2 * inset;
            let height = bbox.height() as i32 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, Rgb(color));
        }
    }

    fn draw_text(&self, frame: &mut Frame, item: &TextItem) {
        let Some(font) = &self.font else {
            return;
        };
        let top = item.baseline - item.px as i32;
        draw_text_mut(
            frame.image_mut(),
            Rgb(item.color),
            item.x,
            top,
            PxScale::from(item.px),
            font,
            &item.text,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn frame_at(stamp: &str) -> Frame {
        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).expect("timestamp");
        let captured_at = naive
            .and_local_timezone(chrono::Local)
            .earliest()
            .expect("local time");
        Frame::from_rgb_at(vec![0u8; 100 * 80 * 3], 100, 80, captured_at).expect("frame")
    }

    #[test]
    fn empty_detections_draw_zero_counters_and_timestamp() {
        let annotated = Annotator::new().annotate(frame_at("2024-03-09 14:05:07"), &[]);
        let overlay = &annotated.overlay;

        assert!(overlay.boxes.is_empty());
        assert_eq!(overlay.summary, RunSummary::default());
        assert_eq!(
            overlay.text("Persons").map(|t| t.text.as_str()),
            Some("Persons Detected: 0")
        );
        assert_eq!(
            overlay.text("Animals").map(|t| t.text.as_str()),
            Some("Animals Detected: 0")
        );
        assert_eq!(overlay.timestamp, "2024-03-09 14:05:07");
        let stamp = overlay.text("2024").expect("timestamp item");
        assert_eq!((stamp.x, stamp.baseline), (10, 60));
    }

    #[test]
    fn person_box_is_labelled_and_drawn_in_person_color() {
        let det = Detection::new(BoundingBox::new(10, 10, 50, 50), 0.87, 0);
        let annotated = Annotator::without_text().annotate(frame_at("2024-03-09 14:05:07"), &[det]);

        let drawn = &annotated.overlay.boxes[0];
        assert_eq!(drawn.label, "Person 0.87");
        assert_eq!(drawn.color, PERSON_COLOR);
        assert_eq!(drawn.bbox, BoundingBox::new(10, 10, 50, 50));

        let image = annotated.frame().image();
        assert_eq!(image.get_pixel(10, 10).0, PERSON_COLOR);
        assert_eq!(image.get_pixel(11, 30).0, PERSON_COLOR);
        assert_eq!(image.get_pixel(30, 30).0, [0, 0, 0]);
    }

    fn lit_pixels(frame: &Frame, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        let image = frame.image();
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| image.get_pixel(x, y).0 != [0, 0, 0])
            .count()
    }

    #[test]
    fn ignored_categories_draw_nothing() {
        let det = Detection::new(BoundingBox::new(10, 10, 50, 50), 0.99, 2);
        let annotated = Annotator::without_text().annotate(frame_at("2024-03-09 14:05:07"), &[det]);

        assert!(annotated.overlay.boxes.is_empty());
        assert!(annotated.frame().as_rgb().iter().all(|&b| b == 0));
        assert_eq!(annotated.overlay.texts.len(), 3);
    }

    #[test]
    fn counters_and_timestamp_are_rasterised_by_default() {
        let annotator = Annotator::new();
        assert!(annotator.renders_text());

        let annotated = annotator.annotate(Frame::filled(200, 120, [0, 0, 0]), &[]);
        let frame = annotated.frame();

        // Persons counter band (baseline 30), animals counter band (baseline 70),
        // timestamp band (baseline height - 20).
        assert!(lit_pixels(frame, 10..200, 0..32) > 0);
        assert!(lit_pixels(frame, 10..200, 40..72) > 0);
        assert!(lit_pixels(frame, 10..200, 82..102) > 0);

        let image = frame.image();
        let red_only = |p: &Rgb<u8>| p.0[0] > 0 && p.0[1] == 0 && p.0[2] == 0;
        assert!((0..32).any(|y| (10..200).any(|x| red_only(image.get_pixel(x, y)))));
    }

    #[test]
    fn labels_are_rasterised_above_the_box() {
        let det = Detection::new(BoundingBox::new(20, 150, 120, 200), 0.87, 0);
        let with_text =
            Annotator::new().annotate(Frame::filled(200, 240, [0, 0, 0]), &[det.clone()]);
        let boxes_only =
            Annotator::without_text().annotate(Frame::filled(200, 240, [0, 0, 0]), &[det]);

        // Label baseline sits at y1 - 10 = 140, clear of the counters.
        assert!(lit_pixels(with_text.frame(), 20..120, 120..146) > 0);
        assert_eq!(lit_pixels(boxes_only.frame(), 20..120, 120..146), 0);
    }

    #[test]
    fn counters_are_per_frame() {
        let annotator = Annotator::new();
        let dets = vec![
            Detection::new(BoundingBox::new(1, 1, 20, 20), 0.5, 0),
            Detection::new(BoundingBox::new(30, 30, 60, 60), 0.5, 21),
        ];
        let first = annotator.annotate(frame_at("2024-03-09 14:05:07"), &dets);
        let second = annotator.annotate(frame_at("2024-03-09 14:05:08"), &dets[..1]);

        assert_eq!(first.overlay.summary.animals, 1);
        assert_eq!(second.overlay.summary.persons, 1);
        assert_eq!(second.overlay.summary.animals, 0);
    }

    #[test]
    fn degenerate_boxes_do_not_panic() {
        let det = Detection::new(BoundingBox::new(95, 75, 95, 200), 0.5, 0);
        let annotated = Annotator::new().annotate(frame_at("2024-03-09 14:05:07"), &[det]);
        assert_eq!(annotated.overlay.boxes.len(), 1);
    }
}
