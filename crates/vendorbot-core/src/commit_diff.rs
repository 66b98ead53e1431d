//! New-commit detection and dedup against previously created jobs.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use vendorbot_state::Job;

use crate::domain::{Commit, Library, Result, VendorbotError};
use crate::providers::{CommitQuery, VersionControl};

/// Upstream commits relevant to one candidate revision, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    /// Everything between the in-tree merge-base and the target.
    pub all_new: Vec<Commit>,
    /// The part of `all_new` no prior job has covered.
    pub unseen: Vec<Commit>,
}

impl UpdateCheck {
    pub fn is_empty(&self) -> bool {
        self.all_new.is_empty()
    }

    pub fn newest_unseen(&self) -> Option<&Commit> {
        self.unseen.last()
    }

    pub fn contains(&self, revision: &str) -> bool {
        self.all_new.iter().any(|c| c.revision == revision)
    }
}

/// Compute the new and unseen commits from the library's in-tree revision
/// to `target`.
///
/// `prior_jobs` is every job of the task stream, relinquished included. Only
/// the most recent one is consulted: commits up to its version count as seen.
pub async fn check_for_update(
    vcs: &dyn VersionControl,
    repo: &Path,
    library: &Library,
    target: &str,
    prior_jobs: &[Job],
) -> Result<UpdateCheck> {
    let base = vcs
        .merge_base(repo, &library.in_tree_revision, target)
        .await?;
    let all_new = vcs
        .commits_between(repo, &base, target, CommitQuery::default())
        .await?;
    if all_new.is_empty() {
        debug!(library = %library.name, target, "no new commits");
        return Ok(UpdateCheck::default());
    }

    let most_recent = prior_jobs.iter().max_by_key(|j| j.id);
    let unseen = match most_recent {
        Some(job) if all_new.iter().any(|c| c.revision == job.version) => {
            vcs.commits_between(repo, &job.version, target, CommitQuery::default())
                .await?
        }
        _ => all_new.clone(),
    };

    let known: HashSet<&str> = all_new.iter().map(|c| c.revision.as_str()).collect();
    let missing: Vec<String> = unseen
        .iter()
        .filter(|c| !known.contains(c.revision.as_str()))
        .map(|c| c.revision.clone())
        .collect();
    if !missing.is_empty() {
        return Err(VendorbotError::UnseenNotSubset {
            library: library.name.clone(),
            missing,
        });
    }

    debug!(
        library = %library.name,
        target,
        all_new = all_new.len(),
        unseen = unseen.len(),
        "update check"
    );
    Ok(UpdateCheck { all_new, unseen })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{test_library, FakeVcs};
    use vendorbot_state::{JobId, JobOutcome, JobStatus, JobType, NewJob};

    fn job(id: u64, version: &str) -> Job {
        Job::from_new(
            JobId(id),
            NewJob {
                library_name: "opus".into(),
                job_type: JobType::Vendoring,
                version: version.into(),
                status: JobStatus::Done,
                outcome: JobOutcome::AllSuccess,
                ticket_id: None,
                release: None,
            },
        )
    }

    fn revs(commits: &[Commit]) -> Vec<&str> {
        commits.iter().map(|c| c.revision.as_str()).collect()
    }

    #[tokio::test]
    async fn no_prior_jobs_everything_unseen() {
        let vcs = FakeVcs::linear(&["base", "a", "b", "c"]);
        let lib = test_library("opus", "base");
        let check = check_for_update(&vcs, Path::new("."), &lib, "c", &[])
            .await
            .unwrap();
        assert_eq!(revs(&check.all_new), vec!["a", "b", "c"]);
        assert_eq!(revs(&check.unseen), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn prior_job_inside_range_trims_unseen() {
        let vcs = FakeVcs::linear(&["base", "a", "b", "c", "d"]);
        let lib = test_library("opus", "base");
        let check = check_for_update(&vcs, Path::new("."), &lib, "d", &[job(1, "a"), job(2, "b")])
            .await
            .unwrap();
        assert_eq!(revs(&check.all_new), vec!["a", "b", "c", "d"]);
        assert_eq!(revs(&check.unseen), vec!["c", "d"]);
        assert_eq!(check.newest_unseen().unwrap().revision, "d");
    }

    #[tokio::test]
    async fn prior_job_outside_range_is_ignored() {
        let vcs = FakeVcs::linear(&["base", "a", "b"]);
        let lib = test_library("opus", "base");
        let check = check_for_update(&vcs, Path::new("."), &lib, "b", &[job(1, "elsewhere")])
            .await
            .unwrap();
        assert_eq!(revs(&check.unseen), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn up_to_date_is_empty() {
        let vcs = FakeVcs::linear(&["base"]);
        let lib = test_library("opus", "base");
        let check = check_for_update(&vcs, Path::new("."), &lib, "base", &[job(1, "base")])
            .await
            .unwrap();
        assert!(check.is_empty());
        assert!(check.unseen.is_empty());
    }

    #[tokio::test]
    async fn unseen_outside_new_range_is_an_error() {
        let vcs = FakeVcs::linear(&["base", "a", "b"]);
        // History rewritten upstream: from `a` the log reaches a commit the
        // merge-base range never saw.
        vcs.override_range("a", "b", &["rewritten", "b"]);
        let lib = test_library("opus", "base");
        let err = check_for_update(&vcs, Path::new("."), &lib, "b", &[job(1, "a")])
            .await
            .unwrap_err();
        match err {
            VendorbotError::UnseenNotSubset { library, missing } => {
                assert_eq!(library, "opus");
                assert_eq!(missing, vec!["rewritten".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
