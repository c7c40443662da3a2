//! Error types for indexsync

use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

/// Sync error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Log store errors (SQLite, windowed reads, row deletes)
    Database,
    /// Index engine errors (term lookup, document writes, commit)
    Index,
    /// Entity provider errors (session open, fetch)
    EntityProvider,
    /// Operation called in the wrong lifecycle state
    InvalidState,
    /// Malformed event model or containment metadata
    InvalidModel,
    /// Consumer rejected a batch
    Consumer,
    /// Configuration errors
    Config,
    /// Serialization/deserialization errors
    Serialization,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Index => "index",
            ErrorKind::EntityProvider => "entity_provider",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidModel => "invalid_model",
            ErrorKind::Consumer => "consumer",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sync error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct SyncError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn entity_provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EntityProvider, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidModel, message)
    }

    pub fn consumer(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Consumer, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// Tantivy error conversions
#[cfg(feature = "tantivy")]
impl From<tantivy::TantivyError> for SyncError {
    fn from(err: tantivy::TantivyError) -> Self {
        SyncError::index(format!("Tantivy error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::new(ErrorKind::IO, format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::config(err.to_string()).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SyncError>;
