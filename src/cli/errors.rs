//! CLI error type

use thiserror::Error;

/// Errors surfaced by the command-line layer.
#[derive(Debug, Error)]
pub enum CliError {
    /// Directory layout could not be created
    #[error("initialization failed: {0}")]
    Init(String),

    /// The runtime reported an error
    #[error(transparent)]
    Runtime(#[from] crate::core::error::Error),
}

impl CliError {
    /// Stable code string for the error JSON printed by main.
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Init(_) => "INIT_FAILED",
            CliError::Runtime(e) => e.kind.code(),
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;

    #[test]
    fn test_runtime_error_keeps_code() {
        let err = CliError::from(Error::not_found("x"));
        assert_eq!(err.code_str(), "NOT_FOUND");
    }

    #[test]
    fn test_init_error_code() {
        let err = CliError::Init("mkdir failed".into());
        assert_eq!(err.code_str(), "INIT_FAILED");
        assert!(err.message().contains("mkdir failed"));
    }
}
