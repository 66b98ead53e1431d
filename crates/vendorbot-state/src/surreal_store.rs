//! SurrealDB-backed JobStore implementation
//!
//! Uses `schema::JobRow` for persistence, converting to/from the job model
//! at the boundary.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::job::{Job, JobId, JobType, NewJob};
use crate::migrations;
use crate::schema::JobRow;
use crate::storage_traits::{JobStore, StorageResult};

const NAMESPACE: &str = "vendorbot";
const DATABASE: &str = "main";

/// Default on-disk location when no URL is configured.
pub const DEFAULT_DB_PATH: &str = ".vendorbot/db";

/// SurrealDB-backed implementation of [`JobStore`].
pub struct SurrealJobStore {
    db: Surreal<Any>,
}

#[derive(Debug, Deserialize)]
struct MaxId {
    job_id: u64,
}

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl SurrealJobStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let store = Self::connect("mem://").await?;
        info!("SurrealJobStore connected (in-memory)");
        Ok(store)
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    ///
    /// Local `surrealkv://` directories are created on demand.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        if let Some(path) = url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        debug!(url, "SurrealJobStore connected");
        Ok(Self { db })
    }

    /// Connect using `VENDORBOT_DB_URL`, falling back to local persistence
    /// under [`DEFAULT_DB_PATH`].
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var("VENDORBOT_DB_URL") {
            info!("SurrealJobStore connecting ({})", url);
            return Self::connect(&url).await;
        }
        let url = format!("surrealkv://{}", DEFAULT_DB_PATH);
        info!("No VENDORBOT_DB_URL found, using local persistence: {}", url);
        Self::connect(&url).await
    }

    // -- private helpers -----------------------------------------------------

    async fn select_rows(&self, sql: &str, binds: Vec<(&'static str, String)>) -> StorageResult<Vec<Job>> {
        let mut query = self.db.query(sql.to_string());
        for (k, v) in binds {
            query = query.bind((k, v));
        }
        let mut res = query.await.map_err(backend)?;
        let rows: Vec<JobRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn fetch_row(&self, id: u64) -> StorageResult<Option<JobRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM jobs WHERE job_id = $id")
            .bind(("id", id))
            .await
            .map_err(backend)?;
        let rows: Vec<JobRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn next_id(&self) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT job_id FROM jobs ORDER BY job_id DESC LIMIT 1")
            .await
            .map_err(backend)?;
        let rows: Vec<MaxId> = res.take(0).map_err(backend)?;
        Ok(rows.first().map_or(1, |r| r.job_id + 1))
    }
}

#[async_trait]
impl JobStore for SurrealJobStore {
    async fn create_job(&self, new: NewJob) -> StorageResult<Job> {
        if self
            .job_by_version(&new.library_name, new.job_type, &new.version)
            .await?
            .is_some()
        {
            return Err(StorageError::DuplicateVersion {
                library: new.library_name,
                job_type: new.job_type.to_string(),
                version: new.version,
            });
        }

        let id = JobId(self.next_id().await?);
        let job = Job::from_new(id, new);
        debug!(job_id = %id, library = %job.library_name, "creating job");

        let _created: Option<JobRow> = self
            .db
            .create("jobs")
            .content(JobRow::from_job(&job))
            .await
            .map_err(backend)?;

        Ok(job)
    }

    async fn save_job(&self, job: &Job) -> StorageResult<()> {
        if self.fetch_row(job.id.0).await?.is_none() {
            return Err(StorageError::JobNotFound { id: job.id.0 });
        }

        let mut row = JobRow::from_job(job);
        row.updated_at = chrono::Utc::now();

        self.db
            .query("UPDATE jobs CONTENT $row WHERE job_id = $id")
            .bind(("row", row))
            .bind(("id", job.id.0))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;

        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StorageResult<Option<Job>> {
        self.fetch_row(id.0).await?.map(JobRow::into_job).transpose()
    }

    async fn job_by_version(
        &self,
        library: &str,
        job_type: JobType,
        version: &str,
    ) -> StorageResult<Option<Job>> {
        let jobs = self
            .select_rows(
                "SELECT * FROM jobs WHERE library_name = $lib AND job_type = $ty AND version = $ver",
                vec![
                    ("lib", library.to_string()),
                    ("ty", job_type.as_str().to_string()),
                    ("ver", version.to_string()),
                ],
            )
            .await?;
        Ok(jobs.into_iter().next())
    }

    async fn jobs_for_library(
        &self,
        library: &str,
        job_type: JobType,
        include_relinquished: bool,
    ) -> StorageResult<Vec<Job>> {
        let jobs = self
            .select_rows(
                "SELECT * FROM jobs WHERE library_name = $lib AND job_type = $ty ORDER BY job_id ASC",
                vec![
                    ("lib", library.to_string()),
                    ("ty", job_type.as_str().to_string()),
                ],
            )
            .await?;
        Ok(jobs
            .into_iter()
            .filter(|j| include_relinquished || j.is_active())
            .collect())
    }

    async fn list_jobs(&self, library: Option<&str>) -> StorageResult<Vec<Job>> {
        match library {
            Some(lib) => {
                self.select_rows(
                    "SELECT * FROM jobs WHERE library_name = $lib ORDER BY job_id ASC",
                    vec![("lib", lib.to_string())],
                )
                .await
            }
            None => {
                self.select_rows("SELECT * FROM jobs ORDER BY job_id ASC", Vec::new())
                    .await
            }
        }
    }

    async fn delete_job(&self, id: JobId) -> StorageResult<()> {
        if self.fetch_row(id.0).await?.is_none() {
            return Err(StorageError::JobNotFound { id: id.0 });
        }
        self.db
            .query("DELETE jobs WHERE job_id = $id")
            .bind(("id", id.0))
            .await
            .map_err(backend)?;
        info!(job_id = %id, "job deleted");
        Ok(())
    }
}
