use thiserror::Error;

/// Home monitor error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Corrupt value for key '{key}': {reason}")]
    CorruptValue { key: String, reason: String },

    #[error("Invalid threshold: {0} (must be a positive, finite number of meters)")]
    InvalidThreshold(f64),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Home location not configured")]
    HomeNotSet,

    #[error("No position fix available")]
    NoFix,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::StorageError(err.to_string())
    }
}
