pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod web_interface;

pub use storage::storage_trait::Storage;
pub use storage::types::{BoundingBox, DetectionObject, PredictionRecord, PredictionSession, SessionMatch};
