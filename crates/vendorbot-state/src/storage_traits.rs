//! Storage trait definitions for vendorbot
//!
//! `JobStore` is the single persistence seam the task runners depend on.
//! It is async and backend-agnostic; an in-memory fake lives in the
//! `fakes` module and a SurrealDB implementation in `surreal_store`.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::job::{Job, JobId, JobType, NewJob};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistent job storage.
///
/// Guarantees:
/// - `create_job` assigns strictly increasing ids.
/// - `(library_name, job_type, version)` is unique; a second `create_job`
///   for the same triple fails with `StorageError::DuplicateVersion`.
/// - `save_job` replaces every mutable field of an existing job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job and return it with its assigned id.
    async fn create_job(&self, new: NewJob) -> StorageResult<Job>;

    /// Overwrite an existing job. Returns `StorageError::JobNotFound` if absent.
    async fn save_job(&self, job: &Job) -> StorageResult<()>;

    /// Fetch a job by id.
    async fn get_job(&self, id: JobId) -> StorageResult<Option<Job>>;

    /// Fetch the job for `version` within a library's task stream.
    async fn job_by_version(
        &self,
        library: &str,
        job_type: JobType,
        version: &str,
    ) -> StorageResult<Option<Job>>;

    /// All jobs of a library's task stream, oldest first.
    async fn jobs_for_library(
        &self,
        library: &str,
        job_type: JobType,
        include_relinquished: bool,
    ) -> StorageResult<Vec<Job>>;

    /// The newest job of a library's task stream, relinquished or not.
    async fn most_recent_job(&self, library: &str, job_type: JobType) -> StorageResult<Option<Job>> {
        let jobs = self.jobs_for_library(library, job_type, true).await?;
        Ok(jobs.into_iter().max_by_key(|j| j.id))
    }

    /// Every job, optionally restricted to one library, oldest first.
    async fn list_jobs(&self, library: Option<&str>) -> StorageResult<Vec<Job>>;

    /// Remove a job. Returns `StorageError::JobNotFound` if absent.
    async fn delete_job(&self, id: JobId) -> StorageResult<()>;
}
