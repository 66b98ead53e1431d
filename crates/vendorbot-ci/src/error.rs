//! Error type for CI dispatch and query.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CiError {
    /// The CI service answered with a non-success HTTP status.
    #[error("CI service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never got an answer.
    #[error("CI service unreachable: {0}")]
    Network(String),

    #[error("CI call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Pushing to the try server failed.
    #[error("try submission failed: {0}")]
    Submission(String),

    /// A response could not be decoded.
    #[error("malformed CI response: {0}")]
    Decode(String),
}

impl CiError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CiError::Http { status, .. } => *status == 429 || *status >= 500,
            CiError::Network(_) | CiError::Timeout { .. } => true,
            CiError::Submission(_) | CiError::Decode(_) => false,
        }
    }
}

impl From<serde_json::Error> for CiError {
    fn from(err: serde_json::Error) -> Self {
        CiError::Decode(err.to_string())
    }
}
