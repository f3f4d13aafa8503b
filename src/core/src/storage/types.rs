use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::StorageError;

/// One detection run over one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSession {
    pub uid: String,
    pub timestamp: DateTime<Utc>,
    pub original_image: String,
    pub predicted_image: String,
}

/// Corners `(x1, y1, x2, y2)` in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundingBox(pub [f64; 4]);

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self([x1, y1, x2, y2])
    }

    /// Serialized form written to both backends.
    pub fn to_stored(&self) -> String {
        // An array of four finite f64 values always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("[]"))
    }

    pub fn from_stored(raw: &str) -> Result<Self, StorageError> {
        serde_json::from_str::<[f64; 4]>(raw)
            .map(Self)
            .map_err(|e| StorageError::Corrupt(format!("box {:?}: {}", raw, e)))
    }
}

/// One labeled bounding box found within a prediction session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionObject {
    pub prediction_uid: String,
    /// Position of the detection within its session.
    pub sequence_index: u32,
    pub label: String,
    pub score: f64,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// A session together with all of its detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(flatten)]
    pub session: PredictionSession,
    #[serde(rename = "detection_objects")]
    pub detections: Vec<DetectionObject>,
}

/// Result row of the label and score queries, identical for every backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionMatch {
    pub uid: String,
}

impl SessionMatch {
    pub(crate) fn from_uids<I: IntoIterator<Item = String>>(uids: I) -> Vec<SessionMatch> {
        let unique: std::collections::BTreeSet<String> = uids.into_iter().collect();
        unique.into_iter().map(|uid| SessionMatch { uid }).collect()
    }
}

/// Parses a stored session timestamp.
///
/// SQLite's `CURRENT_TIMESTAMP` default yields `YYYY-MM-DD HH:MM:SS` in UTC;
/// everything written by this crate otherwise is RFC 3339.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StorageError::Corrupt(format!("timestamp {:?}: {}", raw, e)))
}
