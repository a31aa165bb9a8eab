//! Error types for recall-memory

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::scope::Scope;

/// Errors that can occur in the memory system
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed record: missing field, dangling link, duplicate id...
    #[error("Validation error: {0}")]
    Validation(String),

    /// Query scope outside the four known tiers
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Scope is known but has no root directory configured
    #[error("Scope not configured: {0}")]
    ScopeNotConfigured(Scope),

    /// A single index entry that could not be normalized or resolved
    #[error("Corrupt index entry {entry}: {reason}")]
    CorruptIndexEntry { entry: String, reason: String },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation stopped by its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Embedding backend missing or failing
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Memory not found
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// Engine used before `initialize` or after `teardown`
    #[error("Memory engine not initialized")]
    NotInitialized,

    /// Blocking worker panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Record file could not be parsed
    #[error("Failed to parse record {path}: {source}")]
    RecordParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Builder error
    #[error("Builder error: {0}")]
    Builder(#[from] crate::node::MemoryRecordBuilderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid scope error
    pub fn invalid_scope(scope: impl Into<String>) -> Self {
        Self::InvalidScope(scope.into())
    }

    /// Create a corrupt index entry error
    pub fn corrupt_entry(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptIndexEntry {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether the caller may simply retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
