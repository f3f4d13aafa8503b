//! Backend selection.
//!
//! The process picks exactly one backend at startup; there is no fallback
//! when the configured name is unknown.

use std::str::FromStr;
use std::sync::Arc;

use log::info;

use crate::configuration::types::StorageConfig;
use crate::error_handling::types::StorageError;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::dynamo_store::DynamoItemStore;
use crate::storage::nosql_storage::{NoSqlStorage, TableNames};
use crate::storage::storage_trait::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Relational,
    NoSql,
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "relational" | "sqlite" => Ok(BackendKind::Relational),
            "nosql" | "dynamodb" => Ok(BackendKind::NoSql),
            other => Err(StorageError::Configuration(format!(
                "unknown storage backend {:?}, expected \"relational\" or \"nosql\"",
                other
            ))),
        }
    }
}

impl BackendKind {
    pub fn from_config(value: Option<&str>) -> Result<Self, StorageError> {
        value
            .ok_or_else(|| StorageError::Configuration("no storage backend selected".into()))?
            .parse()
    }
}

/// Builds the configured backend and provisions its schema.
///
/// Any failure here is fatal to startup.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    let storage: Arc<dyn Storage> = match BackendKind::from_config(config.backend.as_deref())? {
        BackendKind::Relational => Arc::new(DatabaseStorage::new_file(&config.relational.path)?),
        BackendKind::NoSql => {
            let nosql = &config.nosql;
            let store = DynamoItemStore::connect(&nosql.region, nosql.endpoint_url.as_deref())?;
            let tables = TableNames::new(&nosql.table_prefix, nosql.environment.as_deref());
            Arc::new(NoSqlStorage::new(store, tables))
        }
    };
    storage.initialize()?;
    info!("Using {} storage backend", storage.backend_name());
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::RelationalConfig;
    use tempfile::TempDir;

    #[test]
    fn test_backend_names_and_aliases() {
        assert_eq!("relational".parse::<BackendKind>().unwrap(), BackendKind::Relational);
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Relational);
        assert_eq!("nosql".parse::<BackendKind>().unwrap(), BackendKind::NoSql);
        assert_eq!("dynamodb".parse::<BackendKind>().unwrap(), BackendKind::NoSql);
    }

    #[test]
    fn test_unknown_backend_fails_fast() {
        assert!(matches!(
            "Relational".parse::<BackendKind>(),
            Err(StorageError::Configuration(_))
        ));
        assert!(matches!(
            BackendKind::from_config(None),
            Err(StorageError::Configuration(_))
        ));
        let config = StorageConfig { backend: Some("postgres".into()), ..Default::default() };
        assert!(matches!(open_storage(&config), Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_open_relational_storage() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: Some("relational".into()),
            relational: RelationalConfig { path: dir.path().join("nested").join("p.db") },
            ..Default::default()
        };
        let storage = open_storage(&config).unwrap();
        assert_eq!(storage.backend_name(), "relational");
        storage.persist_session("u1", "o.jpg", "p.jpg").unwrap();
        assert_eq!(storage.resolve_image_path("u1").unwrap(), "p.jpg");
    }

    #[test]
    fn test_unreachable_relational_store_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let config = StorageConfig {
            backend: Some("relational".into()),
            relational: RelationalConfig { path: blocker.join("p.db") },
            ..Default::default()
        };
        assert!(matches!(open_storage(&config), Err(StorageError::Unavailable(_))));
    }
}

