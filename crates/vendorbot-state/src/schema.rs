//! SurrealDB row types for the `jobs` table.
//!
//! Enumerations are stored as their canonical strings so the table stays
//! readable from the SurrealDB console; conversion back onto the job model
//! happens in [`JobRow::into_job`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::job::{Job, JobId, ReviewPurpose, ReviewSubmission, TryRun, TryRunPurpose};

/// Serialize chrono DateTime as a SurrealDB datetime.
pub(crate) mod surreal_dt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryRunRow {
    pub revision: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRow {
    pub id: String,
    pub purpose: String,
    #[serde(default)]
    pub abandoned: bool,
}

/// One row of the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Store-assigned numeric job id
    pub job_id: u64,
    pub library_name: String,
    /// "vendoring" | "commit-alert"
    pub job_type: String,
    pub version: String,
    pub status: String,
    pub outcome: String,
    pub ticket_id: Option<u64>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub review_submissions: Vec<ReviewRow>,
    #[serde(default)]
    pub try_runs: Vec<TryRunRow>,
    #[serde(default)]
    pub affected_releases: Vec<String>,
    #[serde(default)]
    pub relinquished: bool,
    #[serde(with = "surreal_dt")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_dt")]
    pub updated_at: DateTime<Utc>,
}

fn try_purpose_str(p: TryRunPurpose) -> &'static str {
    match p {
        TryRunPurpose::InitialPlatform => "initial_platform",
        TryRunPurpose::MorePlatforms => "more_platforms",
    }
}

fn review_purpose_str(p: ReviewPurpose) -> &'static str {
    match p {
        ReviewPurpose::Vendoring => "vendoring",
        ReviewPurpose::Patches => "patches",
    }
}

impl JobRow {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: None,
            job_id: job.id.0,
            library_name: job.library_name.clone(),
            job_type: job.job_type.as_str().to_string(),
            version: job.version.clone(),
            status: job.status.as_str().to_string(),
            outcome: job.outcome.as_str().to_string(),
            ticket_id: job.ticket_id,
            release: job.release.clone(),
            review_submissions: job
                .review_submissions
                .iter()
                .map(|r| ReviewRow {
                    id: r.id.clone(),
                    purpose: review_purpose_str(r.purpose).to_string(),
                    abandoned: r.abandoned,
                })
                .collect(),
            try_runs: job
                .try_runs
                .iter()
                .map(|t| TryRunRow {
                    revision: t.revision.clone(),
                    purpose: try_purpose_str(t.purpose).to_string(),
                })
                .collect(),
            affected_releases: job.affected_releases.iter().cloned().collect(),
            relinquished: job.relinquished,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }

    /// Map the row back onto the job model, rejecting unknown enum strings.
    pub fn into_job(self) -> Result<Job, StorageError> {
        let id = self.job_id;
        let corrupt = |detail: String| StorageError::Corrupt { id, detail };

        let review_submissions = self
            .review_submissions
            .into_iter()
            .map(|r| {
                let purpose = match r.purpose.as_str() {
                    "vendoring" => ReviewPurpose::Vendoring,
                    "patches" => ReviewPurpose::Patches,
                    other => return Err(corrupt(format!("unknown review purpose: {other}"))),
                };
                Ok(ReviewSubmission {
                    id: r.id,
                    purpose,
                    abandoned: r.abandoned,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let try_runs = self
            .try_runs
            .into_iter()
            .map(|t| {
                let purpose = match t.purpose.as_str() {
                    "initial_platform" => TryRunPurpose::InitialPlatform,
                    "more_platforms" => TryRunPurpose::MorePlatforms,
                    other => return Err(corrupt(format!("unknown try run purpose: {other}"))),
                };
                Ok(TryRun {
                    revision: t.revision,
                    purpose,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Job {
            id: JobId(id),
            library_name: self.library_name,
            job_type: self.job_type.parse().map_err(corrupt)?,
            version: self.version,
            status: self.status.parse().map_err(corrupt)?,
            outcome: self.outcome.parse().map_err(corrupt)?,
            ticket_id: self.ticket_id,
            release: self.release,
            review_submissions,
            try_runs,
            affected_releases: self.affected_releases.into_iter().collect(),
            relinquished: self.relinquished,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
