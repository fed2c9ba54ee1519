//! Result assembly: turn an inference outcome into the record shown to the user.

use serde::{Serialize, Serializer};
use time::OffsetDateTime;

use crate::detect::{class_name, InferenceOutcome, Prediction};
use crate::locate::LocatedOutput;

pub const NO_OBJECTS_LABEL: &str = "No objects";
pub const ERROR_LABEL: &str = "Error";
pub const MODEL_NOT_LOADED_LABEL: &str = "Model Not Loaded";

/// Confidence of a detection, or `"N/A"` on sentinel entries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Confidence {
    Score(f64),
    NotApplicable,
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Score(score) => serializer.serialize_f64(*score),
            Self::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Score(score) => write!(f, "{:.2}", score),
            Self::NotApplicable => f.write_str("N/A"),
        }
    }
}

/// Box field: pixel coordinates, or a message on sentinel entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BoxField {
    Coords(Vec<i64>),
    Message(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: Confidence,
    #[serde(rename = "box")]
    pub bbox: BoxField,
}

impl Detection {
    pub fn no_objects() -> Self {
        Self {
            label: NO_OBJECTS_LABEL.to_string(),
            confidence: Confidence::Score(1.0),
            bbox: BoxField::Coords(Vec::new()),
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            label: ERROR_LABEL.to_string(),
            confidence: Confidence::NotApplicable,
            bbox: BoxField::Message(description.into()),
        }
    }

    pub fn model_not_loaded() -> Self {
        Self {
            label: MODEL_NOT_LOADED_LABEL.to_string(),
            confidence: Confidence::NotApplicable,
            bbox: BoxField::Message(String::new()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DetectionStatus {
    /// Upload saved, inference not yet finished.
    Processing,
    Complete,
    Failed,
    ModelUnavailable,
}

/// The record kept in the session for the results page.
///
/// `detections` is never empty and `image_url` always names a servable file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    pub filename: String,
    pub image_url: String,
    pub detections: Vec<Detection>,
    pub status: DetectionStatus,
    #[serde(rename = "time", serialize_with = "serialize_timestamp")]
    pub timestamp: OffsetDateTime,
}

fn serialize_timestamp<S: Serializer>(
    ts: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&crate::clock::format_display(*ts))
}

impl DetectionResult {
    /// Record for a saved upload before inference has run.
    pub fn processing(filename: &str, original_url: &str, now: OffsetDateTime) -> Self {
        Self {
            filename: filename.to_string(),
            image_url: original_url.to_string(),
            detections: vec![Detection::no_objects()],
            status: DetectionStatus::Processing,
            timestamp: now,
        }
    }
}

/// URL an upload is served under.
pub fn upload_url(filename: &str) -> String {
    format!("/uploads/{filename}")
}

/// URL a detection artifact is served under.
pub fn output_url(relative: &str) -> String {
    format!("/yolo/{relative}")
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the result record for one upload.
///
/// A failed run always shows the original image, even if an annotated file
/// from an earlier run happens to exist.
pub fn assemble(
    filename: &str,
    original_url: &str,
    outcome: &InferenceOutcome,
    located: Option<&LocatedOutput>,
    now: OffsetDateTime,
) -> DetectionResult {
    let mut result = DetectionResult::processing(filename, original_url, now);
    match outcome {
        InferenceOutcome::ModelUnavailable => {
            result.status = DetectionStatus::ModelUnavailable;
            result.detections = vec![Detection::model_not_loaded()];
        }
        InferenceOutcome::Failed(description) => {
            result.status = DetectionStatus::Failed;
            result.detections = vec![Detection::error(description.clone())];
        }
        InferenceOutcome::Complete(prediction) => match map_detections(prediction) {
            Ok(detections) => {
                result.status = DetectionStatus::Complete;
                if let Some(located) = located {
                    result.image_url = output_url(&located.relative);
                }
                result.detections = if detections.is_empty() {
                    vec![Detection::no_objects()]
                } else {
                    detections
                };
            }
            Err(description) => {
                result.status = DetectionStatus::Failed;
                result.detections = vec![Detection::error(description)];
            }
        },
    }
    result
}

fn map_detections(prediction: &Prediction) -> Result<Vec<Detection>, String> {
    prediction
        .boxes
        .iter()
        .map(|raw| {
            let label = class_name(raw.class_index)
                .ok_or_else(|| format!("class index {} out of range", raw.class_index))?;
            Ok(Detection {
                label: label.to_string(),
                confidence: Confidence::Score(round2(f64::from(raw.confidence))),
                bbox: BoxField::Coords(vec![
                    raw.x1 as i64,
                    raw.y1 as i64,
                    raw.x2 as i64,
                    raw.y2 as i64,
                ]),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawDetection;
    use std::path::PathBuf;
    use time::macros::datetime;

    fn is_sentinel(det: &Detection) -> bool {
        matches!(
            det.label.as_str(),
            NO_OBJECTS_LABEL | ERROR_LABEL | MODEL_NOT_LOADED_LABEL
        )
    }

    fn now() -> OffsetDateTime {
        datetime!(2024-06-01 12:30 UTC)
    }

    fn prediction(boxes: Vec<RawDetection>) -> InferenceOutcome {
        InferenceOutcome::Complete(Prediction {
            save_dir: PathBuf::from("yolo_output/exp"),
            path: PathBuf::from("uploads/site.png"),
            boxes,
        })
    }

    fn located() -> LocatedOutput {
        LocatedOutput {
            path: PathBuf::from("yolo_output/exp/site.png"),
            relative: "exp/site.png".to_string(),
        }
    }

    #[test]
    fn maps_boxes_with_rounding_and_truncation() {
        let outcome = prediction(vec![RawDetection::new([10.9, 20.2, 110.7, 220.99], 0.876, 3)]);
        let result = assemble("site.png", "/uploads/site.png", &outcome, Some(&located()), now());

        assert_eq!(result.status, DetectionStatus::Complete);
        assert_eq!(result.image_url, "/yolo/exp/site.png");
        assert_eq!(
            result.detections,
            vec![Detection {
                label: "helmet".into(),
                confidence: Confidence::Score(0.88),
                bbox: BoxField::Coords(vec![10, 20, 110, 220]),
            }]
        );
    }

    #[test]
    fn zero_detections_yield_no_objects_sentinel() {
        let result = assemble("sample.jpg", "/uploads/sample.jpg", &prediction(vec![]), None, now());
        assert_eq!(result.status, DetectionStatus::Complete);
        assert_eq!(result.image_url, "/uploads/sample.jpg");

        let json = serde_json::to_value(&result.detections).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"label": "No objects", "confidence": 1.0, "box": []}])
        );
    }

    #[test]
    fn failure_keeps_original_image_and_single_error() {
        let outcome = InferenceOutcome::Failed("cannot identify image file".into());
        let result = assemble("site.png", "/uploads/site.png", &outcome, Some(&located()), now());
        assert_eq!(result.status, DetectionStatus::Failed);
        assert_eq!(result.image_url, "/uploads/site.png");
        assert_eq!(result.detections, vec![Detection::error("cannot identify image file")]);

        let json = serde_json::to_value(&result.detections[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"label": "Error", "confidence": "N/A", "box": "cannot identify image file"})
        );
    }

    #[test]
    fn unavailable_model_yields_model_not_loaded() {
        let result = assemble(
            "site.png",
            "/uploads/site.png",
            &InferenceOutcome::ModelUnavailable,
            None,
            now(),
        );
        assert_eq!(result.status, DetectionStatus::ModelUnavailable);
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].label, "Model Not Loaded");
        assert!(is_sentinel(&result.detections[0]));
    }

    #[test]
    fn unknown_class_index_is_a_failure() {
        let outcome = prediction(vec![RawDetection::new([0.0, 0.0, 1.0, 1.0], 0.5, 42)]);
        let result = assemble("site.png", "/uploads/site.png", &outcome, Some(&located()), now());
        assert_eq!(result.status, DetectionStatus::Failed);
        assert_eq!(result.image_url, "/uploads/site.png");
        assert_eq!(result.detections[0].label, "Error");
    }

    #[test]
    fn confidences_have_two_decimals() {
        let boxes = [0.123456f32, 0.5, 0.999, 0.005]
            .iter()
            .map(|c| RawDetection::new([0.0, 0.0, 5.0, 5.0], *c, 0))
            .collect();
        let result = assemble("a.png", "/uploads/a.png", &prediction(boxes), None, now());
        for det in &result.detections {
            let Confidence::Score(score) = det.confidence else {
                panic!("expected score");
            };
            assert_eq!(round2(score), score);
            assert_eq!(det.confidence.to_string().split('.').nth(1).map(str::len), Some(2));
        }
    }

    #[test]
    fn record_serializes_display_time() {
        let result = assemble("a.png", "/uploads/a.png", &prediction(vec![]), None, now());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["time"], "2024-06-01 12:30");
        assert_eq!(json["status"], "Complete");
        assert_eq!(json["filename"], "a.png");
    }
}
