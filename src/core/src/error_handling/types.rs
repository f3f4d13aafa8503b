use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    UnknownBackend(String),
    MissingSection(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::UnknownBackend(e) => write!(f, "Unknown storage backend: {}", e),
            ConfigError::MissingSection(e) => write!(f, "Missing configuration section: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failure kinds of the storage layer.
///
/// Every backend maps its native errors onto these variants, so callers can
/// translate them without knowing which store is active.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Backend selection or backend parameters are invalid.
    Configuration(String),
    /// The store cannot be reached, or provisioning the schema failed.
    Unavailable(String),
    /// No prediction session exists for the requested uid.
    NotFound(String),
    /// A session with the same uid was already persisted.
    WriteConflict(String),
    /// A persisted record could not be decoded.
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Configuration(e) => write!(f, "Storage configuration error: {}", e),
            StorageError::Unavailable(e) => write!(f, "Storage unavailable: {}", e),
            StorageError::NotFound(uid) => write!(f, "Prediction {} not found", uid),
            StorageError::WriteConflict(uid) => write!(f, "Prediction {} already exists", uid),
            StorageError::Corrupt(e) => write!(f, "Corrupt stored record: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::Configuration(err.to_string())
    }
}

#[derive(Debug)]
pub enum PipelineError {
    InvalidImageKey(String),
    ImageTransfer(String),
    DetectionFailed(String),
    Notification(String),
    MalformedMessage(String),
    Queue(String),
    StorageError(StorageError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidImageKey(e) => write!(f, "Invalid image key: {}", e),
            PipelineError::ImageTransfer(e) => write!(f, "Image transfer failed: {}", e),
            PipelineError::DetectionFailed(e) => write!(f, "Detection failed: {}", e),
            PipelineError::Notification(e) => write!(f, "Callback notification failed: {}", e),
            PipelineError::MalformedMessage(e) => write!(f, "Malformed queue message: {}", e),
            PipelineError::Queue(e) => write!(f, "Queue error: {}", e),
            PipelineError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
