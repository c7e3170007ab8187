//! Unified error types for Strata

use thiserror::Error;

/// Unified error type for all Strata operations
#[derive(Error, Debug)]
pub enum StrataError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Input errors (rejected before any remote call)
    #[error("Invalid parent reference: {0}")]
    InvalidParent(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Work item lifecycle errors
    #[error("Work item has no remote identity yet: {0}")]
    NotCreated(String),

    #[error("Remote identity already assigned to {0}")]
    AlreadyAssigned(String),

    // Remote errors
    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("{0}")]
    Board(String),

    #[error("execution timeout after {0}ms")]
    Timeout(u64),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_budget() {
        let err = StrataError::Timeout(250);
        assert_eq!(err.to_string(), "execution timeout after 250ms");
    }

    #[test]
    fn test_board_errors_display_verbatim() {
        let err = StrataError::Board("status field not found".to_string());
        assert_eq!(err.to_string(), "status field not found");
    }
}
