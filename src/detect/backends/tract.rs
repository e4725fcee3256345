#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

const CXYWH_OFFSET: usize = 4;

/// YOLOv8 detector running an exported ONNX model through tract.
///
/// Frames are stretched to the square model input; boxes are scaled back to
/// the frame's pixel grid. Output layout is `[1, 4 + classes, anchors]`.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [batch, attributes, anchors]")?;

        let (_, attributes, anchors) = preds.dim();
        if attributes <= CXYWH_OFFSET {
            return Err(anyhow!("model output has no class scores"));
        }
        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class in 0..attributes - CXYWH_OFFSET {
                let score = preds[[0, CXYWH_OFFSET + class, anchor]];
                if score > best.1 {
                    best = (class, score);
                }
            }
            if best.1 < self.confidence_threshold {
                continue;
            }
            let cx = preds[[0, 0, anchor]] * scale_x;
            let cy = preds[[0, 1, anchor]] * scale_y;
            let w = preds[[0, 2, anchor]] * scale_x;
            let h = preds[[0, 3, anchor]] * scale_y;
            candidates.push(RawDetection {
                x1: (cx - w / 2.0).max(0.0),
                y1: (cy - h / 2.0).max(0.0),
                x2: (cx + w / 2.0).min(frame.width() as f32),
                y2: (cy + h / 2.0).min(frame.height() as f32),
                confidence: best.1,
                class_id: best.0 as u32,
            });
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input_size, self.input_size, [114, 114, 114]);
        self.detect(&blank).map(|_| ())
    }
}

/// Class-wise greedy NMS, highest confidence first.
fn non_max_suppression(mut xs: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(xs.len());
    for det in xs {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && iou(k, &det) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
