//! Prediction pipeline
//!
//! Turns one image reference into a persisted prediction:
//! uid generation, image fetch, detection, storage, publication of the
//! annotated image.
//!
//! Components:
//! - `detector`: the `Detector` boundary and a process-backed implementation.
//! - `image_store`: the `ImageStore` boundary and a directory-backed implementation.
//! - `prediction`: the `PredictionPipeline` orchestrating both around `Storage`.

pub mod detector;
pub mod image_store;
pub mod prediction;

pub use detector::{Detection, Detector, ProcessDetector};
pub use image_store::{ImageStore, LocalImageStore};
pub use prediction::{ImageLayout, PredictionPipeline, PredictionSummary};
