//! Error types for the recall command-line driver.

use recall_memory::MemoryError;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Nothing to link: {0}")]
    NothingToLink(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code, following the sysexits convention
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Memory(
                MemoryError::Validation(_)
                | MemoryError::InvalidScope(_)
                | MemoryError::ScopeNotConfigured(_),
            ) => 64,
            CliError::Memory(MemoryError::NotFound(_)) | CliError::NothingToLink(_) => 66,
            CliError::Memory(MemoryError::EmbeddingUnavailable(_)) => 69,
            CliError::Memory(e) if e.is_retryable() => 75,
            CliError::Io(_) | CliError::Memory(MemoryError::Io(_)) => 74,
            _ => 70,
        }
    }
}

/// Result type alias for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_memory_error_display_is_transparent() {
        let err = CliError::from(MemoryError::invalid_scope("team"));
        assert_eq!(err.to_string(), "Invalid scope: team");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::from(MemoryError::validation("bad")).exit_code(), 64);
        assert_eq!(CliError::from(MemoryError::not_found("x")).exit_code(), 66);
        assert_eq!(
            CliError::from(MemoryError::Timeout(Duration::from_secs(1))).exit_code(),
            75
        );
        assert_eq!(CliError::from(MemoryError::NotInitialized).exit_code(), 70);
    }
}
