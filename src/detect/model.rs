use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::detect::backend::{DetectorBackend, PredictRequest};
use crate::detect::result::Prediction;

/// What one invocation of the detector produced.
#[derive(Clone, Debug)]
pub enum InferenceOutcome {
    Complete(Prediction),
    /// Inference raised; carries the error description.
    Failed(String),
    /// The model never loaded; no inference was attempted.
    ModelUnavailable,
}

/// Process-wide detector handle, loaded once at startup.
///
/// Backends take `&mut self`, so every inference call is serialised by the
/// mutex. Cloning the handle shares the same backend.
#[derive(Clone)]
pub enum ModelHandle {
    Loaded {
        name: &'static str,
        backend: Arc<Mutex<dyn DetectorBackend>>,
    },
    Unavailable {
        reason: String,
    },
}

impl ModelHandle {
    pub fn from_backend<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::Loaded {
            name: backend.name(),
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Load the ONNX model at `path`. Failure degrades to `Unavailable`
    /// instead of aborting the process.
    pub fn load(path: &Path, confidence_threshold: f32) -> Self {
        #[cfg(feature = "backend-tract")]
        {
            use crate::detect::backends::TractBackend;

            let loaded = TractBackend::new(path).and_then(|backend| {
                let mut backend = backend.with_threshold(confidence_threshold);
                backend.warm_up()?;
                Ok(backend)
            });
            match loaded {
                Ok(backend) => {
                    log::info!("detection model loaded from {}", path.display());
                    Self::from_backend(backend)
                }
                Err(err) => {
                    log::error!("detection model load failed: {:#}", err);
                    Self::unavailable(format!("{:#}", err))
                }
            }
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            let _ = confidence_threshold;
            log::error!(
                "cannot load {}: built without the backend-tract feature",
                path.display()
            );
            Self::unavailable("built without the backend-tract feature")
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        match self {
            Self::Loaded { name, .. } => Some(*name),
            Self::Unavailable { .. } => None,
        }
    }

    /// Run one prediction. Never returns an error: faults become `Failed`.
    pub fn invoke(&self, request: &PredictRequest<'_>) -> InferenceOutcome {
        let backend = match self {
            Self::Unavailable { .. } => return InferenceOutcome::ModelUnavailable,
            Self::Loaded { backend, .. } => backend,
        };
        let mut guard = match backend.lock() {
            Ok(guard) => guard,
            Err(_) => return InferenceOutcome::Failed("model lock poisoned".to_string()),
        };
        match guard.predict(request) {
            Ok(prediction) => InferenceOutcome::Complete(prediction),
            Err(err) => {
                log::warn!(
                    "inference failed for {}: {:#}",
                    request.source.display(),
                    err
                );
                InferenceOutcome::Failed(format!("{:#}", err))
            }
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loaded { name, .. } => f.debug_struct("Loaded").field("name", name).finish(),
            Self::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}
