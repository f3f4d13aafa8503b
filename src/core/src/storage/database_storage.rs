use std::path::{Path, PathBuf};

use log::{debug, error, info};
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, SqlErr, TransactionTrait,
};

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{self, detection_objects};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    parse_timestamp, BoundingBox, DetectionObject, PredictionRecord, PredictionSession,
    SessionMatch,
};

/// Table and index layout shared with already deployed databases.
const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS prediction_sessions (
        uid TEXT PRIMARY KEY,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        original_image TEXT,
        predicted_image TEXT
    )",
    "CREATE TABLE IF NOT EXISTS detection_objects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        prediction_uid TEXT,
        label TEXT,
        score REAL,
        box TEXT,
        FOREIGN KEY (prediction_uid) REFERENCES prediction_sessions (uid)
    )",
    "CREATE INDEX IF NOT EXISTS idx_prediction_uid ON detection_objects (prediction_uid)",
    "CREATE INDEX IF NOT EXISTS idx_label ON detection_objects (label)",
    "CREATE INDEX IF NOT EXISTS idx_score ON detection_objects (score)",
];

fn unavailable(context: &str, err: DbErr) -> StorageError {
    error!("{}: {}", context, err);
    StorageError::Unavailable(format!("{}: {}", context, err))
}

fn session_write_error(uid: &str, err: DbErr) -> StorageError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            error!("Duplicate prediction uid {}", uid);
            StorageError::WriteConflict(uid.to_string())
        }
        _ => unavailable("Failed to insert prediction session", err),
    }
}

async fn insert_session<C: ConnectionTrait>(
    conn: &C,
    uid: &str,
    original_image: &str,
    predicted_image: &str,
) -> Result<(), StorageError> {
    let row = db_entities::ActiveModel {
        uid: Set(uid.to_string()),
        timestamp: NotSet,
        original_image: Set(original_image.to_string()),
        predicted_image: Set(predicted_image.to_string()),
    };
    db_entities::Entity::insert(row)
        .exec_without_returning(conn)
        .await
        .map_err(|e| session_write_error(uid, e))?;
    Ok(())
}

async fn insert_detection<C: ConnectionTrait>(
    conn: &C,
    detection: &DetectionObject,
) -> Result<(), StorageError> {
    let row = detection_objects::ActiveModel {
        id: NotSet,
        prediction_uid: Set(detection.prediction_uid.clone()),
        label: Set(detection.label.clone()),
        score: Set(detection.score),
        bbox: Set(detection.bbox.to_stored()),
    };
    detection_objects::Entity::insert(row)
        .exec_without_returning(conn)
        .await
        .map_err(|e| unavailable("Failed to insert detection object", e))?;
    Ok(())
}

/// Relational backend over an embedded SQLite file.
///
/// Every call opens its own unit of work on the pool; the only multi-statement
/// transaction is `persist_prediction`.
pub struct DatabaseStorage {
    rt: tokio::runtime::Runtime,
    db: DatabaseConnection,
    path: PathBuf,
}

impl DatabaseStorage {
    /// Database filename used when the configuration does not name one
    pub const DEFAULT_DB_FILE: &'static str = "predictions.db";

    /// Open (creating if missing) the SQLite file at `path`.
    ///
    /// The schema is not touched until `initialize()` is called.
    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Unavailable(format!("runtime: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create database dir {}: {}", parent.display(), e);
                StorageError::Unavailable(format!("{}: {}", parent.display(), e))
            })?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = rt.block_on(async {
            let mut opts = ConnectOptions::new(url);
            // the schema declares prediction_uid as a foreign key, but a
            // detection may be written before or without its session
            opts.max_connections(5)
                .sqlx_logging(false)
                .map_sqlx_sqlite_opts(|o| o.foreign_keys(false));
            Database::connect(opts).await
        });
        let db = db.map_err(|e| unavailable("Failed to open SQLite database", e))?;
        info!("Opened SQLite database at {}", path.display());
        Ok(Self { rt, db, path })
    }

    /// Distinct uids of sessions joined to at least one detection matching `predicate`.
    fn matching_sessions(&self, predicate: SimpleExpr) -> Result<Vec<SessionMatch>, StorageError> {
        let uids = self.rt.block_on(async {
            db_entities::Entity::find()
                .select_only()
                .column(db_entities::Column::Uid)
                .distinct()
                .join(
                    JoinType::InnerJoin,
                    db_entities::Relation::DetectionObjects.def(),
                )
                .filter(predicate)
                .order_by_asc(db_entities::Column::Uid)
                .into_tuple::<String>()
                .all(&self.db)
                .await
        });
        let uids = uids.map_err(|e| unavailable("Failed to query prediction sessions", e))?;
        Ok(SessionMatch::from_uids(uids))
    }
}

impl Storage for DatabaseStorage {
    fn backend_name(&self) -> &'static str {
        "relational"
    }

    fn initialize(&self) -> Result<(), StorageError> {
        self.rt.block_on(async {
            for statement in SCHEMA {
                self.db
                    .execute_unprepared(statement)
                    .await
                    .map_err(|e| unavailable("Failed to provision schema", e))?;
            }
            Ok::<_, StorageError>(())
        })?;
        info!("SQLite schema ready at {}", self.path.display());
        Ok(())
    }

    fn persist_session(
        &self,
        uid: &str,
        original_image: &str,
        predicted_image: &str,
    ) -> Result<(), StorageError> {
        self.rt
            .block_on(insert_session(&self.db, uid, original_image, predicted_image))?;
        debug!("Saved prediction session {}", uid);
        Ok(())
    }

    fn persist_detection(&self, detection: &DetectionObject) -> Result<(), StorageError> {
        self.rt.block_on(insert_detection(&self.db, detection))?;
        debug!(
            "Saved detection {} ({}) for {}",
            detection.label, detection.score, detection.prediction_uid
        );
        Ok(())
    }

    fn persist_prediction(
        &self,
        uid: &str,
        original_image: &str,
        predicted_image: &str,
        detections: &[DetectionObject],
    ) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let txn = self
                .db
                .begin()
                .await
                .map_err(|e| unavailable("Failed to begin transaction", e))?;
            insert_session(&txn, uid, original_image, predicted_image).await?;
            for detection in detections {
                insert_detection(&txn, detection).await?;
            }
            txn.commit()
                .await
                .map_err(|e| unavailable("Failed to commit prediction", e))
        })?;
        info!(
            "Saved prediction {} with {} detection(s)",
            uid,
            detections.len()
        );
        Ok(())
    }

    fn fetch_by_uid(&self, uid: &str) -> Result<PredictionRecord, StorageError> {
        let (session, rows) = self.rt.block_on(async {
            let session = db_entities::Entity::find_by_id(uid.to_string())
                .one(&self.db)
                .await
                .map_err(|e| unavailable("Failed to read prediction session", e))?;
            let Some(session) = session else {
                return Err(StorageError::NotFound(uid.to_string()));
            };
            let rows = detection_objects::Entity::find()
                .filter(detection_objects::Column::PredictionUid.eq(uid))
                .order_by_asc(detection_objects::Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| unavailable("Failed to read detection objects", e))?;
            Ok((session, rows))
        })?;

        let mut detections = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            detections.push(DetectionObject {
                prediction_uid: row.prediction_uid,
                sequence_index: u32::try_from(index).unwrap_or(u32::MAX),
                label: row.label,
                score: row.score,
                bbox: BoundingBox::from_stored(&row.bbox)?,
            });
        }
        Ok(PredictionRecord {
            session: PredictionSession {
                timestamp: parse_timestamp(&session.timestamp)?,
                uid: session.uid,
                original_image: session.original_image,
                predicted_image: session.predicted_image,
            },
            detections,
        })
    }

    fn query_by_label(&self, label: &str) -> Result<Vec<SessionMatch>, StorageError> {
        self.matching_sessions(detection_objects::Column::Label.eq(label))
    }

    fn query_by_score(&self, min_score: f64) -> Result<Vec<SessionMatch>, StorageError> {
        self.matching_sessions(detection_objects::Column::Score.gte(min_score))
    }

    fn resolve_image_path(&self, uid: &str) -> Result<String, StorageError> {
        let path = self.rt.block_on(async {
            db_entities::Entity::find_by_id(uid.to_string())
                .select_only()
                .column(db_entities::Column::PredictedImage)
                .into_tuple::<String>()
                .one(&self.db)
                .await
        });
        path.map_err(|e| unavailable("Failed to read prediction session", e))?
            .ok_or_else(|| StorageError::NotFound(uid.to_string()))
    }
}
