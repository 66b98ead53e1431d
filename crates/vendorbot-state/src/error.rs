//! Error types for vendorbot-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the state backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::JobStore`] operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No job exists with the given id.
    #[error("job not found: {id}")]
    JobNotFound { id: u64 },

    /// A job for the same library, task type and version is already stored.
    #[error("job for {library} ({job_type}) at version {version} already exists")]
    DuplicateVersion {
        library: String,
        job_type: String,
        version: String,
    },

    /// A stored row could not be mapped back onto the job model.
    #[error("corrupt job record {id}: {detail}")]
    Corrupt { id: u64, detail: String },

    /// Backend failure (query, connection, lock poisoning).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
