use crate::embedding::EmbeddingError;
use crate::index::{IndexError, Topology};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tierstore
#[derive(Error, Debug)]
pub enum TierStoreError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// A persisted store or embedder disagrees with the active configuration
    #[error("Configuration mismatch on {field}: store has {stored}, active is {active}")]
    ConfigMismatch {
        field: &'static str,
        stored: String,
        active: String,
    },

    /// Persisted artifacts are unreadable or inconsistent with each other
    #[error("Corrupt store at {path}: {message}")]
    CorruptStore { path: PathBuf, message: String },

    /// Upstream embedding failure; the batch was aborted
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Embedding did not finish within the caller's deadline
    #[error("Embedding timed out after {elapsed_ms}ms")]
    EmbeddingTimeout { elapsed_ms: u64 },

    /// Rebuild into a new topology failed; the previous index is still live
    #[error("Migration {from} -> {to} failed: {source}")]
    Migration {
        from: Topology,
        to: Topology,
        #[source]
        source: IndexError,
    },

    /// Index mutation failed outside of a migration
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TierStoreError {
    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for tierstore operations
pub type Result<T> = std::result::Result<T, TierStoreError>;
