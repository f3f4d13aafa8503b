//! Storage Trait
//!
//! This module defines the `Storage` trait, the single query contract the
//! service depends on regardless of the backing store.
//!
//! Implementors of this trait are responsible for:
//! - Provisioning their schema idempotently
//! - Persisting prediction sessions and their detections
//! - Fetching a session with all of its detections
//! - Answering label and score queries with distinct session identifiers
//! - Resolving the predicted-image reference of a session
//!
//! All methods are synchronous and return a `Result` carrying a `StorageError`.
//! Nothing is retried here; retry policy belongs to the caller.

use crate::error_handling::types::StorageError;
use crate::storage::types::{DetectionObject, PredictionRecord, SessionMatch};

/// The `Storage` trait defines the interface shared by the relational and the
/// NoSQL backends.
///
/// Both implementations must return the same logical results for the same
/// inputs: label and score queries yield de-duplicated `SessionMatch` values
/// sorted by uid.
pub trait Storage: Send + Sync {
    /// Short backend name used in logs and the health endpoint.
    fn backend_name(&self) -> &'static str;

    /// Ensures tables and indexes exist. Calling it again is a no-op.
    fn initialize(&self) -> Result<(), StorageError>;

    /// Inserts a new session; the store assigns its timestamp.
    ///
    /// Each uid must be passed exactly once. The relational backend rejects a
    /// duplicate with `WriteConflict`; the NoSQL backend overwrites.
    fn persist_session(
        &self,
        uid: &str,
        original_image: &str,
        predicted_image: &str,
    ) -> Result<(), StorageError>;

    /// Inserts one detection. The owning session is not checked.
    fn persist_detection(&self, detection: &DetectionObject) -> Result<(), StorageError>;

    /// Returns the session and every detection it owns, or `NotFound`.
    fn fetch_by_uid(&self, uid: &str) -> Result<PredictionRecord, StorageError>;

    /// Sessions owning at least one detection with exactly this label.
    fn query_by_label(&self, label: &str) -> Result<Vec<SessionMatch>, StorageError>;

    /// Sessions owning at least one detection with `score >= min_score`.
    fn query_by_score(&self, min_score: f64) -> Result<Vec<SessionMatch>, StorageError>;

    /// The predicted-image reference of a session, or `NotFound`.
    fn resolve_image_path(&self, uid: &str) -> Result<String, StorageError>;

    /// Writes a session followed by its detections.
    ///
    /// Backends that support transactions override this so that both writes
    /// land atomically.
    fn persist_prediction(
        &self,
        uid: &str,
        original_image: &str,
        predicted_image: &str,
        detections: &[DetectionObject],
    ) -> Result<(), StorageError> {
        self.persist_session(uid, original_image, predicted_image)?;
        for detection in detections {
            self.persist_detection(detection)?;
        }
        Ok(())
    }
}
