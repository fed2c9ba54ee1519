use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::detect::result::Prediction;

/// Where a prediction reads its input and writes its annotated copy.
///
/// The annotated image lands in `<project>/<name>/`. The same `name` is reused
/// for every run, so a later run overwrites an earlier run's artifact.
#[derive(Clone, Copy, Debug)]
pub struct PredictRequest<'a> {
    pub source: &'a Path,
    pub project: &'a Path,
    pub name: &'a str,
}

impl PredictRequest<'_> {
    pub fn save_dir(&self) -> PathBuf {
        self.project.join(self.name)
    }
}

/// Detector backend trait.
///
/// Implementations run one forward pass over the image at `request.source`,
/// write an annotated copy under `request.save_dir()` and return the raw boxes.
/// Any fault (unreadable image, runtime failure) is returned as an error; the
/// caller converts it into a per-request failure and never retries.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an image file.
    fn predict(&mut self, request: &PredictRequest<'_>) -> Result<Prediction>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
