//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryJobStore`, which satisfies the `JobStore` contract
//! without any external dependencies.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::job::{Job, JobId, JobType, NewJob};
use crate::storage_traits::{JobStore, StorageResult};

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    jobs: BTreeMap<u64, Job>,
}

/// In-memory job store backed by a `BTreeMap<id, Job>`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Backend(format!("job store lock poisoned: {e}")))
    }
}

fn in_stream(job: &Job, library: &str, job_type: JobType) -> bool {
    job.library_name == library && job.job_type == job_type
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: NewJob) -> StorageResult<Job> {
        let mut inner = self.lock()?;
        let duplicate = inner.jobs.values().any(|j| {
            in_stream(j, &new.library_name, new.job_type) && j.version == new.version
        });
        if duplicate {
            return Err(StorageError::DuplicateVersion {
                library: new.library_name,
                job_type: new.job_type.to_string(),
                version: new.version,
            });
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let job = Job::from_new(JobId(id), new);
        inner.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn save_job(&self, job: &Job) -> StorageResult<()> {
        let mut inner = self.lock()?;
        let slot = inner
            .jobs
            .get_mut(&job.id.0)
            .ok_or(StorageError::JobNotFound { id: job.id.0 })?;
        let mut updated = job.clone();
        updated.updated_at = Utc::now();
        *slot = updated;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StorageResult<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id.0).cloned())
    }

    async fn job_by_version(
        &self,
        library: &str,
        job_type: JobType,
        version: &str,
    ) -> StorageResult<Option<Job>> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .values()
            .find(|j| in_stream(j, library, job_type) && j.version == version)
            .cloned())
    }

    async fn jobs_for_library(
        &self,
        library: &str,
        job_type: JobType,
        include_relinquished: bool,
    ) -> StorageResult<Vec<Job>> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .values()
            .filter(|j| in_stream(j, library, job_type))
            .filter(|j| include_relinquished || j.is_active())
            .cloned()
            .collect())
    }

    async fn list_jobs(&self, library: Option<&str>) -> StorageResult<Vec<Job>> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .values()
            .filter(|j| library.map_or(true, |l| j.library_name == l))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, id: JobId) -> StorageResult<()> {
        self.lock()?
            .jobs
            .remove(&id.0)
            .map(|_| ())
            .ok_or(StorageError::JobNotFound { id: id.0 })
    }
}
