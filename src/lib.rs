//! PPE Vision
//!
//! A small web service for checking personal protective equipment on site
//! photos. An authenticated user uploads an image, a YOLO-style detector
//! runs over it, and the annotated image is shown next to a table of
//! detections (helmet, vest, gloves, goggles, boots and their absence).
//!
//! # Module Structure
//!
//! - `upload`: extension allow-list and filename sanitising
//! - `storage`: upload/output directories and the contact log
//! - `detect`: detector backends, the shared model handle, box drawing
//! - `locate`: finding the annotated image a detector run wrote
//! - `assemble`: turning a run into the record shown to the user
//! - `pipeline`: upload → detect → locate → assemble for one request
//! - `auth`, `session`: single-account login and server-side sessions
//! - `web`: HTTP server, routes and page rendering
//! - `config`: JSON file plus environment configuration

pub mod assemble;
pub mod auth;
pub mod clock;
pub mod config;
pub mod detect;
pub mod locate;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod upload;
pub mod web;

pub use assemble::{assemble, BoxField, Confidence, Detection, DetectionResult, DetectionStatus};
pub use config::AppConfig;
pub use detect::{DetectorBackend, InferenceOutcome, ModelHandle, PredictRequest, StubBackend};
pub use pipeline::{detect_upload, DetectionRun};
pub use storage::StoragePaths;
pub use upload::{accept_filename, UploadRejection};
pub use web::{AppState, WebConfig, WebHandle, WebServer};
