#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::annotate::save_annotated;
use crate::detect::backend::{DetectorBackend, PredictRequest};
use crate::detect::result::{Prediction, RawDetection};

/// Square input edge of the exported YOLOv8 model.
pub const INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const NMS_IOU: f32 = 0.45;
const PAD_VALUE: u8 = 114;

/// Tract-based backend for a YOLOv8 ONNX export.
///
/// Expects a `[1, 3, 640, 640]` input and a `[1, 4 + classes, anchors]` output
/// with `cx, cy, w, h` followed by per-class scores.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = INPUT_SIZE as usize;
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
            confidence_threshold: DEFAULT_CONFIDENCE,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, letterboxed: &RgbImage) -> Tensor {
        let size = INPUT_SIZE as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            letterboxed.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&mut self, request: &PredictRequest<'_>) -> Result<Prediction> {
        let image = image::open(request.source)
            .with_context(|| format!("failed to decode {}", request.source.display()))?
            .to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("image {} is empty", request.source.display()));
        }

        let (letterboxed, geometry) = letterbox(&image, INPUT_SIZE);
        let input = self.build_input(&letterboxed);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, anchors]")?;

        let shape = scores.shape();
        if shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);
        let mut rows = Vec::with_capacity(anchors);
        for i in 0..anchors {
            let row: Vec<f32> = (0..channels).map(|c| scores[[0, c, i]]).collect();
            rows.push(row);
        }

        let candidates = decode_rows(&rows, self.confidence_threshold, &geometry);
        let boxes = non_max_suppression(candidates, NMS_IOU);
        log::debug!(
            "tract backend: {} boxes above {:.2} in {}",
            boxes.len(),
            self.confidence_threshold,
            request.source.display()
        );

        let save_dir = request.save_dir();
        save_annotated(&image, &boxes, &save_dir, request.source)?;

        Ok(Prediction {
            save_dir,
            path: request.source.to_path_buf(),
            boxes,
        })
    }
}

/// Scale and padding applied when fitting an image into the model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: ((target - new_w) / 2) as f32,
            pad_y: ((target - new_h) / 2) as f32,
            width,
            height,
        }
    }

    /// Map a box from model-input space back to source pixels.
    pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        let w = self.width as f32;
        let h = self.height as f32;
        [
            ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
            ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
            ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
            ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

fn letterbox(image: &RgbImage, target: u32) -> (RgbImage, Letterbox) {
    let geometry = Letterbox::new(image.width(), image.height(), target);
    let new_w = ((image.width() as f32 * geometry.scale).round() as u32).clamp(1, target);
    let new_h = ((image.height() as f32 * geometry.scale).round() as u32).clamp(1, target);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target, target, Rgb([PAD_VALUE; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );
    (canvas, geometry)
}

/// Turn per-anchor rows (`cx, cy, w, h, scores...`) into candidate boxes.
fn decode_rows(rows: &[Vec<f32>], threshold: f32, geometry: &Letterbox) -> Vec<RawDetection> {
    let mut out = Vec::new();
    for row in rows {
        if row.len() <= 4 {
            continue;
        }
        let Some((class_index, score)) = row[4..]
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if !score.is_finite() || score < threshold {
            continue;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let bbox = geometry.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
        out.push(RawDetection::new(bbox, score, class_index));
    }
    out
}

/// Class-aware greedy NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_index == cand.class_index && k.iou(&cand) > iou);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}
