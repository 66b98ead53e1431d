//! Error taxonomy for vendorbot orchestration.

use vendorbot_ci::CiError;
use vendorbot_state::StorageError;

/// Failures talking to an external collaborator (subprocess or HTTP).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("{service} returned HTTP {status}: {message}")]
    Http {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} unreachable: {message}")]
    Network { service: String, message: String },

    /// The collaborator answered, but not in a shape we understand.
    #[error("unexpected response from {service}: {message}")]
    Protocol { service: String, message: String },
}

impl ProviderError {
    pub fn protocol(service: &str, message: impl Into<String>) -> Self {
        ProviderError::Protocol {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

/// vendorbot domain errors.
#[derive(Debug, thiserror::Error)]
pub enum VendorbotError {
    /// The unseen commits are not a subset of the new commits. The prior
    /// job's recorded version no longer fits the upstream history.
    #[error("unseen commits for {library} are not a subset of the new commits; missing from new range: {missing:?}")]
    UnseenNotSubset {
        library: String,
        missing: Vec<String>,
    },

    #[error("{library} has {count} active {job_type} jobs, expected at most one")]
    MultipleActiveJobs {
        library: String,
        job_type: String,
        count: usize,
    },

    /// A job was left in CREATED by an interrupted run.
    #[error("job {job_id} for {library} was still in CREATED state")]
    UnexpectedCreatedStatus { job_id: u64, library: String },

    #[error("job {job_id} is in {status} but has no {purpose} try run recorded")]
    MissingTryRun {
        job_id: u64,
        status: String,
        purpose: String,
    },

    #[error("could not set reviewer on {submission} for job {job_id}: {source}")]
    ReviewerNotSet {
        job_id: u64,
        submission: String,
        #[source]
        source: ProviderError,
    },

    #[error("invalid frequency `{0}`")]
    InvalidFrequency(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Ci(#[from] CiError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for vendorbot domain operations.
pub type Result<T> = std::result::Result<T, VendorbotError>;
