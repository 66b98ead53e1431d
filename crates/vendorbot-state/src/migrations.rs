//! SurrealDB schema migrations and initialization

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all vendorbot tables in SurrealDB.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing vendorbot SurrealDB schema");
    init_jobs_table(db).await?;
    info!("vendorbot schema initialization complete");
    Ok(())
}

/// Initialize `jobs` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE jobs {
///   job_id:             INT (unique, store-assigned, monotonic)
///   library_name:       STRING (indexed)
///   job_type:           STRING (vendoring | commit-alert)
///   version:            STRING
///   status:             STRING
///   outcome:            STRING
///   ticket_id:          INT?
///   review_submissions: ARRAY<OBJECT>
///   try_runs:           ARRAY<OBJECT>
///   affected_releases:  ARRAY<STRING>
///   relinquished:       BOOL
///   created_at:         DATETIME
///   updated_at:         DATETIME
/// }
/// ```
///
/// Constraints:
/// - `job_id` is unique
/// - `(library_name, job_type, version)` is unique
async fn init_jobs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing jobs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS jobs AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_job_id ON TABLE jobs COLUMNS job_id UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_job_version ON TABLE jobs
            COLUMNS library_name, job_type, version UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_job_library ON TABLE jobs COLUMNS library_name;
    "#;

    db.query(sql).await?.check()?;
    info!("jobs table initialized");
    Ok(())
}
