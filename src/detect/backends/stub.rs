use anyhow::{anyhow, Context, Result};

use crate::detect::annotate::save_annotated;
use crate::detect::backend::{DetectorBackend, PredictRequest};
use crate::detect::result::{Prediction, RawDetection};

enum Script {
    Detections(Vec<RawDetection>),
    Fail(String),
}

/// Stub backend for testing and for running without a model file.
///
/// Returns a fixed set of boxes (or a fixed error) for every image. When
/// annotation is enabled it decodes the input and writes the annotated copy
/// exactly where a real backend would.
pub struct StubBackend {
    script: Script,
    annotate: bool,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_detections(Vec::new())
    }

    pub fn with_detections(boxes: Vec<RawDetection>) -> Self {
        Self {
            script: Script::Detections(boxes),
            annotate: true,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Script::Fail(message.into()),
            annotate: false,
        }
    }

    /// Skip writing the annotated image.
    pub fn without_annotation(mut self) -> Self {
        self.annotate = false;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&mut self, request: &PredictRequest<'_>) -> Result<Prediction> {
        let boxes = match &self.script {
            Script::Detections(boxes) => boxes.clone(),
            Script::Fail(message) => return Err(anyhow!("{}", message)),
        };
        let save_dir = request.save_dir();
        if self.annotate {
            let image = image::open(request.source)
                .with_context(|| format!("failed to decode {}", request.source.display()))?
                .to_rgb8();
            save_annotated(&image, &boxes, &save_dir, request.source)?;
        }
        Ok(Prediction {
            save_dir,
            path: request.source.to_path_buf(),
            boxes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn stub_reports_scripted_failure() {
        let mut backend = StubBackend::failing("corrupt image");
        let request = PredictRequest {
            source: Path::new("missing.png"),
            project: Path::new("out"),
            name: "exp",
        };
        let err = backend.predict(&request).unwrap_err();
        assert_eq!(err.to_string(), "corrupt image");
    }

    #[test]
    fn stub_writes_annotated_copy_into_run_folder() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("site.png");
        image::RgbImage::new(12, 12).save(&source).unwrap();
        let project = dir.path().join("yolo_output");

        let mut backend =
            StubBackend::with_detections(vec![RawDetection::new([1.0, 1.0, 8.0, 8.0], 0.8, 3)]);
        let request = PredictRequest {
            source: &source,
            project: &project,
            name: "exp",
        };
        let prediction = backend.predict(&request).unwrap();

        assert_eq!(prediction.save_dir, project.join("exp"));
        assert_eq!(prediction.path, source);
        assert_eq!(prediction.boxes.len(), 1);
        assert!(project.join("exp").join("site.png").exists());
    }

    #[test]
    fn stub_without_annotation_accepts_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sample.jpg");
        std::fs::write(&source, b"not really a jpeg").unwrap();
        let mut backend = StubBackend::new().without_annotation();
        let request = PredictRequest {
            source: &source,
            project: dir.path(),
            name: "exp",
        };
        let prediction = backend.predict(&request).unwrap();
        assert!(prediction.boxes.is_empty());
        assert!(!dir.path().join("exp").exists());
    }
}
