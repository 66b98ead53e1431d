//! The persisted job entity and its enumerations.
//!
//! A [`Job`] is one attempt to process a specific upstream version of a
//! library for one task type. Every field on it is part of the durable
//! contract across process restarts: the task runners only ever re-attempt
//! steps past the last field recorded here.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned job identifier. Monotonic: a higher id was created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bug-tracker ticket number.
pub type TicketId = u64;

/// Which task produced a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Vendoring,
    CommitAlert,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Vendoring => "vendoring",
            JobType::CommitAlert => "commit-alert",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vendoring" => Ok(JobType::Vendoring),
            "commit-alert" | "commitalert" => Ok(JobType::CommitAlert),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Position of a job in the vendoring state machine.
///
/// Commit-alert jobs are created directly in [`JobStatus::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    AwaitingInitialPlatformTryResults,
    AwaitingSecondPlatformsTryResults,
    AwaitingRetriggerResults,
    Done,
    /// Legacy terminal status for superseded jobs; newer jobs use the
    /// `relinquished` flag instead.
    Relinquished,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::AwaitingInitialPlatformTryResults => {
                "AWAITING_INITIAL_PLATFORM_TRY_RESULTS"
            }
            JobStatus::AwaitingSecondPlatformsTryResults => {
                "AWAITING_SECOND_PLATFORMS_TRY_RESULTS"
            }
            JobStatus::AwaitingRetriggerResults => "AWAITING_RETRIGGER_RESULTS",
            JobStatus::Done => "DONE",
            JobStatus::Relinquished => "RELINQUISHED",
        }
    }

    /// `true` for statuses the state machine never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Relinquished)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATED" => JobStatus::Created,
            "AWAITING_INITIAL_PLATFORM_TRY_RESULTS" => JobStatus::AwaitingInitialPlatformTryResults,
            "AWAITING_SECOND_PLATFORMS_TRY_RESULTS" => JobStatus::AwaitingSecondPlatformsTryResults,
            "AWAITING_RETRIGGER_RESULTS" => JobStatus::AwaitingRetriggerResults,
            "DONE" => JobStatus::Done,
            "RELINQUISHED" => JobStatus::Relinquished,
            other => return Err(format!("unknown job status: {other}")),
        })
    }
}

/// Terminal classification of a job. `Pending` until the job reaches DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Pending,
    AllSuccess,
    ClassifiedFailures,
    UnclassifiedFailures,
    BuildFailed,
    CouldNotVendor,
    CouldNotVendorAllFiles,
    CouldNotCommit,
    CouldNotCommitPatches,
    CouldNotSubmitToTry,
    CouldNotSubmitToPhab,
    CouldNotSetReviewer,
    CouldNotRevendor,
    UnexpectedCreatedStatus,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Pending => "PENDING",
            JobOutcome::AllSuccess => "ALL_SUCCESS",
            JobOutcome::ClassifiedFailures => "CLASSIFIED_FAILURES",
            JobOutcome::UnclassifiedFailures => "UNCLASSIFIED_FAILURES",
            JobOutcome::BuildFailed => "BUILD_FAILED",
            JobOutcome::CouldNotVendor => "COULD_NOT_VENDOR",
            JobOutcome::CouldNotVendorAllFiles => "COULD_NOT_VENDOR_ALL_FILES",
            JobOutcome::CouldNotCommit => "COULD_NOT_COMMIT",
            JobOutcome::CouldNotCommitPatches => "COULD_NOT_COMMIT_PATCHES",
            JobOutcome::CouldNotSubmitToTry => "COULD_NOT_SUBMIT_TO_TRY",
            JobOutcome::CouldNotSubmitToPhab => "COULD_NOT_SUBMIT_TO_PHAB",
            JobOutcome::CouldNotSetReviewer => "COULD_NOT_SET_REVIEWER",
            JobOutcome::CouldNotRevendor => "COULD_NOT_REVENDOR",
            JobOutcome::UnexpectedCreatedStatus => "UNEXPECTED_CREATED_STATUS",
        }
    }

    /// Outcomes whose update is still a candidate for landing, so the
    /// ticket keeps tracking which releases the upstream change affects.
    pub fn tracks_release_impact(&self) -> bool {
        matches!(
            self,
            JobOutcome::AllSuccess
                | JobOutcome::ClassifiedFailures
                | JobOutcome::UnclassifiedFailures
        )
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => JobOutcome::Pending,
            "ALL_SUCCESS" => JobOutcome::AllSuccess,
            "CLASSIFIED_FAILURES" => JobOutcome::ClassifiedFailures,
            "UNCLASSIFIED_FAILURES" => JobOutcome::UnclassifiedFailures,
            "BUILD_FAILED" => JobOutcome::BuildFailed,
            "COULD_NOT_VENDOR" => JobOutcome::CouldNotVendor,
            "COULD_NOT_VENDOR_ALL_FILES" => JobOutcome::CouldNotVendorAllFiles,
            "COULD_NOT_COMMIT" => JobOutcome::CouldNotCommit,
            "COULD_NOT_COMMIT_PATCHES" => JobOutcome::CouldNotCommitPatches,
            "COULD_NOT_SUBMIT_TO_TRY" => JobOutcome::CouldNotSubmitToTry,
            "COULD_NOT_SUBMIT_TO_PHAB" => JobOutcome::CouldNotSubmitToPhab,
            "COULD_NOT_SET_REVIEWER" => JobOutcome::CouldNotSetReviewer,
            "COULD_NOT_REVENDOR" => JobOutcome::CouldNotRevendor,
            "UNEXPECTED_CREATED_STATUS" => JobOutcome::UnexpectedCreatedStatus,
            other => return Err(format!("unknown job outcome: {other}")),
        })
    }
}

/// Why a try run was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TryRunPurpose {
    InitialPlatform,
    MorePlatforms,
}

impl fmt::Display for TryRunPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRunPurpose::InitialPlatform => f.write_str("initial platform"),
            TryRunPurpose::MorePlatforms => f.write_str("more platforms"),
        }
    }
}

/// A CI submission tied to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryRun {
    pub revision: String,
    pub purpose: TryRunPurpose,
}

/// Which commit a review submission carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPurpose {
    /// The vendored upstream code.
    Vendoring,
    /// Local patches applied on top of the vendored code.
    Patches,
}

impl fmt::Display for ReviewPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewPurpose::Vendoring => f.write_str("vendoring commit"),
            ReviewPurpose::Patches => f.write_str("patches commit"),
        }
    }
}

/// A code-review submission tied to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub id: String,
    pub purpose: ReviewPurpose,
    /// Set once the submission has been abandoned, so it is never abandoned twice.
    #[serde(default)]
    pub abandoned: bool,
}

/// Fields supplied when a job is first created; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub library_name: String,
    pub job_type: JobType,
    pub version: String,
    pub status: JobStatus,
    pub outcome: JobOutcome,
    pub ticket_id: Option<TicketId>,
    /// Release train current when the job was created.
    pub release: Option<String>,
}

/// The unit of persisted work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub library_name: String,
    pub job_type: JobType,
    /// Upstream revision (or release tag) this job targets.
    pub version: String,
    pub status: JobStatus,
    pub outcome: JobOutcome,
    pub ticket_id: Option<TicketId>,
    pub release: Option<String>,
    pub review_submissions: Vec<ReviewSubmission>,
    pub try_runs: Vec<TryRun>,
    /// Releases this job's upstream change has been recorded as affecting.
    pub affected_releases: BTreeSet<String>,
    pub relinquished: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Materialise a [`NewJob`] with a store-assigned id.
    pub fn from_new(id: JobId, new: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id,
            library_name: new.library_name,
            job_type: new.job_type,
            version: new.version,
            status: new.status,
            outcome: new.outcome,
            ticket_id: new.ticket_id,
            release: new.release,
            review_submissions: Vec::new(),
            try_runs: Vec::new(),
            affected_releases: BTreeSet::new(),
            relinquished: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` while the job has not been superseded.
    pub fn is_active(&self) -> bool {
        !self.relinquished && self.status != JobStatus::Relinquished
    }

    /// Move to `status`, leaving the outcome untouched.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Move to DONE with the given outcome.
    pub fn finish(&mut self, outcome: JobOutcome) {
        self.status = JobStatus::Done;
        self.outcome = outcome;
        self.updated_at = Utc::now();
    }

    pub fn record_try_run(&mut self, revision: impl Into<String>, purpose: TryRunPurpose) {
        self.try_runs.push(TryRun {
            revision: revision.into(),
            purpose,
        });
        self.updated_at = Utc::now();
    }

    pub fn record_review_submission(&mut self, id: impl Into<String>, purpose: ReviewPurpose) {
        self.review_submissions.push(ReviewSubmission {
            id: id.into(),
            purpose,
            abandoned: false,
        });
        self.updated_at = Utc::now();
    }

    pub fn try_run(&self, purpose: TryRunPurpose) -> Option<&TryRun> {
        self.try_runs.iter().find(|t| t.purpose == purpose)
    }

    /// Review submissions not yet abandoned.
    pub fn open_review_submissions(&self) -> impl Iterator<Item = &ReviewSubmission> {
        self.review_submissions.iter().filter(|r| !r.abandoned)
    }

    pub fn mark_review_abandoned(&mut self, id: &str) {
        if let Some(sub) = self.review_submissions.iter_mut().find(|r| r.id == id) {
            sub.abandoned = true;
            self.updated_at = Utc::now();
        }
    }

    pub fn is_affected(&self, release: &str) -> bool {
        self.affected_releases.contains(release)
    }

    /// Record `release` as affected. Returns `false` if it already was.
    pub fn mark_affected(&mut self, release: &str) -> bool {
        let inserted = self.affected_releases.insert(release.to_string());
        if inserted {
            self.updated_at = Utc::now();
        }
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::from_new(
            JobId(7),
            NewJob {
                library_name: "libvpx".to_string(),
                job_type: JobType::Vendoring,
                version: "deadbeef".to_string(),
                status: JobStatus::Created,
                outcome: JobOutcome::Pending,
                ticket_id: Some(1234),
                release: Some("140".to_string()),
            },
        )
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            JobStatus::Created,
            JobStatus::AwaitingInitialPlatformTryResults,
            JobStatus::AwaitingSecondPlatformsTryResults,
            JobStatus::AwaitingRetriggerResults,
            JobStatus::Done,
            JobStatus::Relinquished,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn outcome_serde_uses_screaming_case() {
        let json = serde_json::to_string(&JobOutcome::CouldNotVendorAllFiles).unwrap();
        assert_eq!(json, "\"COULD_NOT_VENDOR_ALL_FILES\"");
        assert_eq!(
            "COULD_NOT_VENDOR_ALL_FILES".parse::<JobOutcome>().unwrap(),
            JobOutcome::CouldNotVendorAllFiles
        );
    }

    #[test]
    fn only_landable_outcomes_track_release_impact() {
        assert!(JobOutcome::AllSuccess.tracks_release_impact());
        assert!(JobOutcome::UnclassifiedFailures.tracks_release_impact());
        assert!(!JobOutcome::BuildFailed.tracks_release_impact());
        assert!(!JobOutcome::CouldNotCommit.tracks_release_impact());
    }

    #[test]
    fn finish_sets_done_and_outcome() {
        let mut job = sample();
        job.finish(JobOutcome::BuildFailed);
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.outcome, JobOutcome::BuildFailed);
    }

    #[test]
    fn mark_affected_is_idempotent() {
        let mut job = sample();
        assert!(job.mark_affected("135"));
        assert!(!job.mark_affected("135"));
        assert!(job.is_affected("135"));
        assert_eq!(job.affected_releases.len(), 1);
    }

    #[test]
    fn abandoned_submissions_are_no_longer_open() {
        let mut job = sample();
        job.record_review_submission("D100", ReviewPurpose::Vendoring);
        job.record_review_submission("D101", ReviewPurpose::Patches);
        job.mark_review_abandoned("D100");

        let open: Vec<&str> = job.open_review_submissions().map(|r| r.id.as_str()).collect();
        assert_eq!(open, vec!["D101"]);
    }

    #[test]
    fn relinquished_status_or_flag_means_inactive() {
        let mut job = sample();
        assert!(job.is_active());
        job.relinquished = true;
        assert!(!job.is_active());

        let mut legacy = sample();
        legacy.transition(JobStatus::Relinquished);
        assert!(!legacy.is_active());
    }

    #[test]
    fn try_run_lookup_by_purpose() {
        let mut job = sample();
        job.record_try_run("rev1", TryRunPurpose::InitialPlatform);
        job.record_try_run("rev2", TryRunPurpose::MorePlatforms);
        assert_eq!(
            job.try_run(TryRunPurpose::MorePlatforms).map(|t| t.revision.as_str()),
            Some("rev2")
        );
    }
}
