//! Errors reported by tracker clients

use strata_core::StrataError;
use thiserror::Error;

/// Failure of a single remote tracker call
///
/// Variants are classified so callers can tell a genuine "does not exist"
/// answer apart from transient or permission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Precondition token no longer matches the remote version
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TrackerError {
    /// Whether the remote positively reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<TrackerError> for StrataError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::Unauthorized(msg) => StrataError::Auth(msg),
            other => StrataError::Tracker(other.to_string()),
        }
    }
}

/// Result type for tracker calls
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_found_is_not_found() {
        assert!(TrackerError::NotFound("docs/a.md".into()).is_not_found());
        assert!(!TrackerError::Transport("connection reset".into()).is_not_found());
        assert!(!TrackerError::Unauthorized("bad credentials".into()).is_not_found());
        assert!(!TrackerError::Remote {
            status: 500,
            message: "boom".into()
        }
        .is_not_found());
    }

    #[test]
    fn test_conversion_into_strata_error() {
        let err: StrataError = TrackerError::Unauthorized("expired".into()).into();
        assert!(matches!(err, StrataError::Auth(_)));

        let err: StrataError = TrackerError::RateLimited("slow down".into()).into();
        assert_eq!(err.to_string(), "Tracker error: rate limited: slow down");
    }
}
