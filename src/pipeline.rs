//! Upload → detect → locate → assemble, for one request.

use anyhow::Result;

use crate::assemble::{assemble, upload_url, DetectionResult};
use crate::clock;
use crate::detect::{InferenceOutcome, ModelHandle, PredictRequest};
use crate::locate::locate_output;
use crate::storage::StoragePaths;

pub const OUTPUT_NOT_FOUND_WARNING: &str = "Annotated image not found, showing the original upload";

/// Outcome of processing one accepted upload.
#[derive(Clone, Debug)]
pub struct DetectionRun {
    pub result: DetectionResult,
    /// Non-fatal problem to surface to the user.
    pub warning: Option<String>,
}

/// Save an accepted upload and run detection over it.
///
/// `filename` must already be validated and sanitised. Only saving the file
/// can fail; detection problems end up in the returned record.
pub fn detect_upload(
    model: &ModelHandle,
    storage: &StoragePaths,
    filename: &str,
    bytes: &[u8],
) -> Result<DetectionRun> {
    let saved = storage.save_upload(filename, bytes)?;
    log::info!("saved upload {} ({} bytes)", saved.display(), bytes.len());

    let request = PredictRequest {
        source: &saved,
        project: &storage.output_dir,
        name: &storage.run_name,
    };
    let outcome = model.invoke(&request);

    let mut warning = None;
    let located = match &outcome {
        InferenceOutcome::Complete(prediction) => {
            let located =
                locate_output(&prediction.save_dir, &prediction.path, &storage.output_dir);
            if located.is_none() {
                log::warn!(
                    "annotated output for {} not found in {}",
                    filename,
                    prediction.save_dir.display()
                );
                warning = Some(OUTPUT_NOT_FOUND_WARNING.to_string());
            }
            located
        }
        InferenceOutcome::Failed(_) | InferenceOutcome::ModelUnavailable => None,
    };

    let result = assemble(
        filename,
        &upload_url(filename),
        &outcome,
        located.as_ref(),
        clock::now(),
    );
    log::info!(
        "detection for {}: {:?}, {} entries",
        filename,
        result.status,
        result.detections.len()
    );
    Ok(DetectionRun { result, warning })
}
