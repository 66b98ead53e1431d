//! Frequency gate: whether a task may act on a candidate upstream revision.

use chrono::{DateTime, Duration, Utc};
use vendorbot_state::Job;

use crate::domain::{Frequency, Task};

/// Inputs to [`should_process`] besides the task itself.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    /// Most recent job of the task stream, relinquished included.
    pub most_recent: Option<&'a Job>,
    pub current_release: &'a str,
    /// New commits between the in-tree revision and the candidate.
    pub commits_since_in_tree: usize,
    /// Commits between the most recent job's version and the candidate.
    pub commits_since_last_job: usize,
    pub now: DateTime<Utc>,
}

fn weeks_elapsed(job: &Job, weeks: u32, now: DateTime<Utc>) -> bool {
    now - job.created_at > Duration::weeks(i64::from(weeks))
}

fn enough_commits(input: &GateInput<'_>, required: u32) -> bool {
    let count = input
        .commits_since_in_tree
        .min(input.commits_since_last_job);
    count >= required as usize
}

/// Evaluate the task's frequency policy once, before any mutating action.
pub fn should_process(task: &Task, input: &GateInput<'_>) -> bool {
    match task.frequency {
        Frequency::Every => true,
        Frequency::Commits(n) => enough_commits(input, n),
        _ if input.most_recent.is_none() => true,
        Frequency::Release => input
            .most_recent
            .map_or(true, |job| job.release.as_deref() != Some(input.current_release)),
        Frequency::Weeks(weeks) => input
            .most_recent
            .map_or(true, |job| weeks_elapsed(job, weeks, input.now)),
        Frequency::WeeksAndCommits { weeks, commits } => {
            input
                .most_recent
                .map_or(true, |job| weeks_elapsed(job, weeks, input.now))
                && enough_commits(input, commits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommitFilter;
    use vendorbot_state::{JobId, JobOutcome, JobStatus, JobType, NewJob};

    fn task(frequency: Frequency) -> Task {
        Task {
            job_type: JobType::Vendoring,
            frequency,
            branch: None,
            filter: CommitFilter::None,
            cc: vec![],
            needinfo: vec![],
            blocking: None,
            reviewer: None,
            initial_platform: "linux64".into(),
        }
    }

    fn job_created(days_ago: i64, release: &str) -> Job {
        let mut job = Job::from_new(
            JobId(1),
            NewJob {
                library_name: "opus".into(),
                job_type: JobType::Vendoring,
                version: "abc".into(),
                status: JobStatus::Done,
                outcome: JobOutcome::AllSuccess,
                ticket_id: Some(1),
                release: Some(release.into()),
            },
        );
        job.created_at = Utc::now() - Duration::days(days_ago);
        job
    }

    fn input<'a>(job: Option<&'a Job>, in_tree: usize, since_job: usize) -> GateInput<'a> {
        GateInput {
            most_recent: job,
            current_release: "140",
            commits_since_in_tree: in_tree,
            commits_since_last_job: since_job,
            now: Utc::now(),
        }
    }

    #[test]
    fn every_always_runs() {
        let recent = job_created(0, "140");
        assert!(should_process(&task(Frequency::Every), &input(Some(&recent), 0, 0)));
    }

    #[test]
    fn first_job_for_time_and_release_policies() {
        for f in [
            Frequency::Release,
            Frequency::Weeks(4),
            Frequency::WeeksAndCommits { weeks: 1, commits: 50 },
        ] {
            assert!(should_process(&task(f), &input(None, 1, 1)), "{f} should run first time");
        }
    }

    #[test]
    fn weeks_window() {
        let old = job_created(15, "140");
        let fresh = job_created(3, "140");
        let t = task(Frequency::Weeks(2));
        assert!(should_process(&t, &input(Some(&old), 1, 1)));
        assert!(!should_process(&t, &input(Some(&fresh), 1, 1)));
    }

    #[test]
    fn release_policy_runs_once_per_release() {
        let t = task(Frequency::Release);
        let same = job_created(1, "140");
        let older = job_created(1, "139");
        assert!(!should_process(&t, &input(Some(&same), 5, 5)));
        assert!(should_process(&t, &input(Some(&older), 5, 5)));
    }

    #[test]
    fn commit_count_uses_the_smaller_window() {
        let recent = job_created(0, "140");
        let t = task(Frequency::Commits(5));
        assert!(should_process(&t, &input(Some(&recent), 12, 5)));
        assert!(!should_process(&t, &input(Some(&recent), 12, 4)));
        assert!(!should_process(&t, &input(None, 3, 3)));
    }

    #[test]
    fn combined_policy_needs_both() {
        let t = task(Frequency::WeeksAndCommits { weeks: 1, commits: 3 });
        let old = job_created(10, "140");
        let fresh = job_created(2, "140");
        assert!(should_process(&t, &input(Some(&old), 3, 3)));
        assert!(!should_process(&t, &input(Some(&old), 3, 2)));
        assert!(!should_process(&t, &input(Some(&fresh), 30, 30)));
    }
}
