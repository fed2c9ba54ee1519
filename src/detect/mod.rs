pub mod annotate;
mod backend;
pub mod backends;
mod labels;
mod model;
mod result;

pub use backend::{DetectorBackend, PredictRequest};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{class_name, CLASS_NAMES};
pub use model::{InferenceOutcome, ModelHandle};
pub use result::{Prediction, RawDetection};
