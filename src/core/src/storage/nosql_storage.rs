//! NoSQL backend.
//!
//! The managed store has no joins and no foreign keys, so the two query
//! operations are served by secondary indexes declared up front:
//!
//! - `label-index` keyed on `label`, for exact label matches;
//! - `score-index` keyed on the constant `score_partition` attribute with the
//!   numeric `score` as range key. Index queries need an exact partition
//!   match before a range condition, so every detection carries the same
//!   partition value and `score >= X` becomes a range query on that index;
//!
//! Detections have no natural unique attribute, so their primary key is
//! `prediction_uid` plus the composite sort key
//! `{prediction_uid}#{label}#{score}#{sequence_index}`. Fetching one session
//! is a query on the table itself, which unlike the indexes reads
//! consistently.

use chrono::Utc;
use log::{debug, info};

use crate::error_handling::types::StorageError;
use crate::storage::item_store::{
    AttrKind, AttrValue, IndexQuery, IndexSpec, Item, ItemStore, KeyAttr, KeyMatch, TableSpec,
};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    parse_timestamp, BoundingBox, DetectionObject, PredictionRecord, PredictionSession,
    SessionMatch,
};

pub const LABEL_INDEX: &str = "label-index";
pub const SCORE_INDEX: &str = "score-index";

/// Value shared by every detection in the `score_partition` attribute.
pub const SCORE_PARTITION_VALUE: &str = "all";

const UID: KeyAttr = KeyAttr { name: "uid", kind: AttrKind::String };
const DETECTION_ID: KeyAttr = KeyAttr { name: "id", kind: AttrKind::String };
const PREDICTION_UID: KeyAttr = KeyAttr { name: "prediction_uid", kind: AttrKind::String };
const SEQUENCE_INDEX: KeyAttr = KeyAttr { name: "sequence_index", kind: AttrKind::Number };
const LABEL: KeyAttr = KeyAttr { name: "label", kind: AttrKind::String };
const SCORE_PARTITION: KeyAttr = KeyAttr { name: "score_partition", kind: AttrKind::String };
const SCORE: KeyAttr = KeyAttr { name: "score", kind: AttrKind::Number };

/// Physical table names for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub sessions: String,
    pub detections: String,
}

impl TableNames {
    /// `{prefix}_prediction_sessions`, or `{prefix}_{environment}_prediction_sessions`
    /// when an environment tag is given.
    pub fn new(prefix: &str, environment: Option<&str>) -> Self {
        let base = match environment.filter(|e| !e.is_empty()) {
            Some(env) => format!("{}_{}", prefix, env),
            None => prefix.to_string(),
        };
        Self {
            sessions: format!("{}_prediction_sessions", base),
            detections: format!("{}_detection_objects", base),
        }
    }

    fn session_table(&self) -> TableSpec {
        TableSpec {
            name: self.sessions.clone(),
            partition_key: UID,
            sort_key: None,
            indexes: Vec::new(),
        }
    }

    fn detection_table(&self) -> TableSpec {
        TableSpec {
            name: self.detections.clone(),
            partition_key: PREDICTION_UID,
            sort_key: Some(DETECTION_ID),
            indexes: vec![
                IndexSpec { name: LABEL_INDEX, partition_key: LABEL, sort_key: None },
                IndexSpec { name: SCORE_INDEX, partition_key: SCORE_PARTITION, sort_key: Some(SCORE) },
            ],
        }
    }
}

fn key_part(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('#', "\\#")
}

/// Sort key of a detection item. `\` and `#` inside a component are
/// backslash-escaped so the `#` separators stay unambiguous.
pub fn detection_key(detection: &DetectionObject) -> String {
    format!(
        "{}#{}#{}#{}",
        key_part(&detection.prediction_uid),
        key_part(&detection.label),
        detection.score,
        detection.sequence_index
    )
}

fn text(item: &Item, attribute: &str) -> Result<String, StorageError> {
    item.get(attribute)
        .and_then(AttrValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| StorageError::Corrupt(format!("missing text attribute {}", attribute)))
}

fn number(item: &Item, attribute: &str) -> Result<f64, StorageError> {
    item.get(attribute)
        .and_then(AttrValue::as_f64)
        .ok_or_else(|| StorageError::Corrupt(format!("missing numeric attribute {}", attribute)))
}

fn session_from_item(item: &Item) -> Result<PredictionSession, StorageError> {
    Ok(PredictionSession {
        uid: text(item, UID.name)?,
        timestamp: parse_timestamp(&text(item, "timestamp")?)?,
        original_image: text(item, "original_image")?,
        predicted_image: text(item, "predicted_image")?,
    })
}

fn detection_from_item(item: &Item) -> Result<DetectionObject, StorageError> {
    let sequence_index = number(item, SEQUENCE_INDEX.name)?;
    if sequence_index < 0.0 || sequence_index.fract() != 0.0 || sequence_index > u32::MAX as f64 {
        return Err(StorageError::Corrupt(format!("sequence index {}", sequence_index)));
    }
    Ok(DetectionObject {
        prediction_uid: text(item, PREDICTION_UID.name)?,
        sequence_index: sequence_index as u32,
        label: text(item, LABEL.name)?,
        score: number(item, SCORE.name)?,
        bbox: BoundingBox::from_stored(&text(item, "box")?)?,
    })
}

fn prediction_uids(items: Vec<Item>) -> Result<Vec<SessionMatch>, StorageError> {
    let uids = items
        .iter()
        .map(|item| text(item, PREDICTION_UID.name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SessionMatch::from_uids(uids))
}

/// NoSQL backend translating the storage contract onto an `ItemStore`.
pub struct NoSqlStorage<S: ItemStore> {
    store: S,
    tables: TableNames,
}

impl<S: ItemStore> NoSqlStorage<S> {
    pub fn new(store: S, tables: TableNames) -> Self {
        Self { store, tables }
    }

    fn session_item(&self, uid: &str) -> Result<Option<Item>, StorageError> {
        let key = KeyMatch { attribute: UID.name, value: AttrValue::S(uid.to_string()) };
        self.store.get_item(&self.tables.sessions, &key)
    }
}

impl<S: ItemStore> Storage for NoSqlStorage<S> {
    fn backend_name(&self) -> &'static str {
        "nosql"
    }

    fn initialize(&self) -> Result<(), StorageError> {
        self.store.ensure_table(&self.tables.session_table())?;
        self.store.ensure_table(&self.tables.detection_table())?;
        info!(
            "NoSQL tables ready: {}, {}",
            self.tables.sessions, self.tables.detections
        );
        Ok(())
    }

    fn persist_session(
        &self,
        uid: &str,
        original_image: &str,
        predicted_image: &str,
    ) -> Result<(), StorageError> {
        let item = Item::from([
            (UID.name.to_string(), AttrValue::S(uid.to_string())),
            ("timestamp".to_string(), AttrValue::S(Utc::now().to_rfc3339())),
            ("original_image".to_string(), AttrValue::S(original_image.to_string())),
            ("predicted_image".to_string(), AttrValue::S(predicted_image.to_string())),
        ]);
        self.store.put_item(&self.tables.sessions, item)?;
        debug!("Saved prediction session {}", uid);
        Ok(())
    }

    fn persist_detection(&self, detection: &DetectionObject) -> Result<(), StorageError> {
        let item = Item::from([
            (DETECTION_ID.name.to_string(), AttrValue::S(detection_key(detection))),
            (PREDICTION_UID.name.to_string(), AttrValue::S(detection.prediction_uid.clone())),
            (SEQUENCE_INDEX.name.to_string(), AttrValue::number(f64::from(detection.sequence_index))),
            (LABEL.name.to_string(), AttrValue::S(detection.label.clone())),
            (SCORE.name.to_string(), AttrValue::number(detection.score)),
            (SCORE_PARTITION.name.to_string(), AttrValue::S(SCORE_PARTITION_VALUE.to_string())),
            ("box".to_string(), AttrValue::S(detection.bbox.to_stored())),
        ]);
        self.store.put_item(&self.tables.detections, item)?;
        debug!(
            "Saved detection {} ({}) for {}",
            detection.label, detection.score, detection.prediction_uid
        );
        Ok(())
    }

    fn fetch_by_uid(&self, uid: &str) -> Result<PredictionRecord, StorageError> {
        let item = self
            .session_item(uid)?
            .ok_or_else(|| StorageError::NotFound(uid.to_string()))?;
        let session = session_from_item(&item)?;
        let items = self.store.query(&IndexQuery {
            table: &self.tables.detections,
            index: None,
            partition: KeyMatch { attribute: PREDICTION_UID.name, value: AttrValue::S(uid.to_string()) },
            sort_at_least: None,
        })?;
        let mut detections = items
            .iter()
            .map(detection_from_item)
            .collect::<Result<Vec<_>, _>>()?;
        detections.sort_by_key(|d| d.sequence_index);
        Ok(PredictionRecord { session, detections })
    }

    fn query_by_label(&self, label: &str) -> Result<Vec<SessionMatch>, StorageError> {
        let items = self.store.query(&IndexQuery {
            table: &self.tables.detections,
            index: Some(LABEL_INDEX),
            partition: KeyMatch { attribute: LABEL.name, value: AttrValue::S(label.to_string()) },
            sort_at_least: None,
        })?;
        prediction_uids(items)
    }

    fn query_by_score(&self, min_score: f64) -> Result<Vec<SessionMatch>, StorageError> {
        let items = self.store.query(&IndexQuery {
            table: &self.tables.detections,
            index: Some(SCORE_INDEX),
            partition: KeyMatch {
                attribute: SCORE_PARTITION.name,
                value: AttrValue::S(SCORE_PARTITION_VALUE.to_string()),
            },
            sort_at_least: Some(KeyMatch { attribute: SCORE.name, value: AttrValue::number(min_score) }),
        })?;
        prediction_uids(items)
    }

    fn resolve_image_path(&self, uid: &str) -> Result<String, StorageError> {
        let item = self
            .session_item(uid)?
            .ok_or_else(|| StorageError::NotFound(uid.to_string()))?;
        text(&item, "predicted_image")
    }
}
