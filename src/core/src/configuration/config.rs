use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::storage::factory::BackendKind;
use clap::Parser;
use log::info;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Command-line arguments.
///
/// The configuration file carries the full setup; the flags below override
/// the handful of values that usually differ per deployment. Each override
/// can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "detection-service")]
#[command(version)]
#[command(about = "Object detection service with queryable prediction history")]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_file: PathBuf,

    /// Storage backend, `relational` or `nosql`
    #[arg(long, env = "STORAGE_TYPE")]
    pub storage_backend: Option<String>,

    /// SQLite file used by the relational backend
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// HTTP port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// # Fields Overview
///
/// - `server`: bind address and port of the HTTP API
/// - `storage`: backend selection and per-backend parameters
/// - `images`: where original and annotated images live on disk
/// - `inference`: optional external detector; without it `/predict` answers 503
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads the file named on the command line and applies the overrides.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&args.config_file)?;
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(backend) = &args.storage_backend {
            self.storage.backend = Some(backend.clone());
        }
        if let Some(path) = &args.db_path {
            self.storage.relational.path = path.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.storage.backend.as_deref() {
            None => return Err(ConfigError::MissingSection("storage.backend".into())),
            Some(name) => {
                name.parse::<BackendKind>()
                    .map_err(|_| ConfigError::UnknownBackend(name.to_string()))?;
            }
        }
        if self.server.port == 0 {
            return Err(ConfigError::NotInRange("server.port must be 1-65535".into()));
        }
        if let Some(inference) = &self.inference {
            if inference.command.trim().is_empty() {
                return Err(ConfigError::MissingSection("inference.command".into()));
            }
        }
        Ok(())
    }
}
