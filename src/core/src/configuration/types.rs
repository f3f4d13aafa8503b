use std::path::PathBuf;

use serde::Deserialize;

use crate::storage::database_storage::DatabaseStorage;

fn default_bind_address() -> String {
    String::from("0.0.0.0")
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DatabaseStorage::DEFAULT_DB_FILE)
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct RelationalConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_table_prefix() -> String {
    String::from("majd_yolo")
}

fn default_region() -> String {
    String::from("eu-west-1")
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct NoSqlConfig {
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// Deployment tag folded into the table names, e.g. `dev` or `prod`
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint, e.g. a local DynamoDB
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for NoSqlConfig {
    fn default() -> Self {
        Self {
            table_prefix: default_table_prefix(),
            environment: None,
            region: default_region(),
            endpoint_url: None,
        }
    }
}

/// Backend selection plus the parameters of each backend. Only the section
/// matching `backend` is used.
#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub backend: Option<String>,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub nosql: NoSqlConfig,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_object_root() -> PathBuf {
    PathBuf::from("bucket")
}

fn default_published_prefix() -> String {
    String::from("yolo_to_poly_images")
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct ImagesConfig {
    /// Holds the `original/` and `predicted/` directories
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Root of the directory-backed object store
    #[serde(default = "default_object_root")]
    pub object_root: PathBuf,
    /// Key prefix under which annotated images are published
    #[serde(default = "default_published_prefix")]
    pub published_prefix: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            object_root: default_object_root(),
            published_prefix: default_published_prefix(),
        }
    }
}

/// External detector program. It receives the source image path and the
/// annotated output path as its last two arguments.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct InferenceConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}
