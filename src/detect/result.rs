use std::path::PathBuf;

/// One box produced by a backend, in source-image pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Index into the label vocabulary. Not validated by backends.
    pub class_index: usize,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_index: usize) -> Self {
        Self {
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            confidence,
            class_index,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &RawDetection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Result of a single forward pass.
#[derive(Clone, Debug, Default)]
pub struct Prediction {
    /// Directory the backend wrote its annotated image into.
    pub save_dir: PathBuf,
    /// Input path as it was handed to the backend.
    pub path: PathBuf,
    pub boxes: Vec<RawDetection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.9, 0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.9, 0);
        let b = RawDetection::new([20.0, 20.0, 30.0, 30.0], 0.9, 0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.9, 0);
        let b = RawDetection::new([5.0, 0.0, 15.0, 10.0], 0.9, 0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }
}
