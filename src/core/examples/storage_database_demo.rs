use detection_service::storage::database_storage::DatabaseStorage;
use detection_service::storage::memory_store::MemoryItemStore;
use detection_service::storage::nosql_storage::{NoSqlStorage, TableNames};
use detection_service::storage::storage_trait::Storage;
use detection_service::{BoundingBox, DetectionObject};
use env_logger::Env;
use log::info;
use std::env;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

fn main() {
    // Initialize logger (RUST_LOG can override; default to info)
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    let out_dir: PathBuf = env::var("STORAGE_DEMO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("storage_demo"));
    fs::create_dir_all(&out_dir).expect("create output dir");

    let relational = DatabaseStorage::new_file(out_dir.join("predictions.db")).expect("open db");
    let nosql = NoSqlStorage::new(MemoryItemStore::new(), TableNames::new("demo", Some("local")));
    let backends: [&dyn Storage; 2] = [&relational, &nosql];

    let uid = Uuid::new_v4().to_string();
    let detections = vec![
        DetectionObject {
            prediction_uid: uid.clone(),
            sequence_index: 0,
            label: "cat".into(),
            score: 0.95,
            bbox: BoundingBox::new(10.0, 20.0, 30.0, 40.0),
        },
        DetectionObject {
            prediction_uid: uid.clone(),
            sequence_index: 1,
            label: "dog".into(),
            score: 0.5,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        },
    ];

    for storage in backends {
        storage.initialize().expect("initialize");
        storage
            .persist_prediction(
                &uid,
                &format!("uploads/original/{}.jpg", uid),
                &format!("uploads/predicted/{}.jpg", uid),
                &detections,
            )
            .expect("persist prediction");

        let record = storage.fetch_by_uid(&uid).expect("fetch");
        info!(
            "[{}] {} stored at {} with {} detection(s)",
            storage.backend_name(),
            record.session.uid,
            record.session.timestamp,
            record.detections.len()
        );
        info!(
            "[{}] label 'cat' -> {:?}, score >= 0.9 -> {:?}",
            storage.backend_name(),
            storage.query_by_label("cat").expect("label query"),
            storage.query_by_score(0.9).expect("score query")
        );
    }

    let record = relational.fetch_by_uid(&uid).expect("fetch");
    println!("{}", serde_json::to_string_pretty(&record).expect("serialize"));
}
