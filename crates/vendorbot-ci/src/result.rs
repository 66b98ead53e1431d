//! Per-run CI job results and push-health triage.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Failure-classification id the CI system uses for "not classified".
pub const NOT_CLASSIFIED: u32 = 1;

/// Lifecycle state of one CI job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiJobState {
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
    Busted,
}

impl CiJobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CiJobState::Pending | CiJobState::Running)
    }
}

/// Result reported for a finished CI job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiJobResult {
    Success,
    /// The run was automatically retried; a later run supersedes it.
    Retry,
    TestFailed,
    Busted,
    Exception,
    UserCancel,
    Unknown,
}

impl CiJobResult {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CiJobResult::TestFailed | CiJobResult::Busted | CiJobResult::Exception
        )
    }
}

/// One run of one CI job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiJob {
    /// Job type, e.g. `test-linux1804-64-qr/opt-mochitest-media-1`.
    pub job_type_name: String,
    pub task_id: String,
    /// Attempt number within the task; reruns keep the task id.
    #[serde(default)]
    pub run_id: u32,
    pub state: CiJobState,
    pub result: CiJobResult,
    #[serde(default = "default_classification")]
    pub failure_classification_id: u32,
}

fn default_classification() -> u32 {
    NOT_CLASSIFIED
}

impl CiJob {
    /// Identity used when combining results across try runs.
    pub fn key(&self) -> (&str, u32) {
        (self.task_id.as_str(), self.run_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn failed(&self) -> bool {
        if !self.is_terminal() {
            return false;
        }
        // A failed state with no reported result still counts.
        self.result.is_failure()
            || (self.result == CiJobResult::Unknown && self.state != CiJobState::Completed)
    }

    pub fn is_build(&self) -> bool {
        self.job_type_name.to_ascii_lowercase().contains("build")
    }

    pub fn is_lint(&self) -> bool {
        self.job_type_name.to_ascii_lowercase().contains("lint")
    }

    pub fn is_decision_task(&self) -> bool {
        self.job_type_name.to_ascii_lowercase().contains("decision")
    }
}

/// Combine the job lists of several try runs, oldest run first.
///
/// Jobs are keyed by `(task_id, run_id)`; when a key appears more than
/// once the later entry wins. First-seen order is preserved.
pub fn combine_results<I>(runs: I) -> Vec<CiJob>
where
    I: IntoIterator<Item = Vec<CiJob>>,
{
    let mut order: Vec<(String, u32)> = Vec::new();
    let mut latest: HashMap<(String, u32), CiJob> = HashMap::new();
    for run in runs {
        for job in run {
            let key = (job.task_id.clone(), job.run_id);
            if latest.insert(key.clone(), job).is_none() {
                order.push(key);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|k| latest.remove(&k))
        .collect()
}

/// One failing test as triaged by push health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthFailure {
    pub test_name: String,
    pub job_type_name: String,
    /// Task ids of the runs in which the test failed.
    pub failed_task_ids: Vec<String>,
    /// How many runs of the job type executed the test.
    pub total_runs: u32,
}

impl HealthFailure {
    pub fn failed_runs(&self) -> usize {
        self.failed_task_ids.len()
    }

    /// Every failing run belongs to the same (retriggered) task.
    pub fn same_task(&self) -> bool {
        self.failed_task_ids
            .first()
            .map_or(true, |first| self.failed_task_ids.iter().all(|t| t == first))
    }

    /// "N of M failed on the same retriggered task" or "...on different tasks".
    pub fn describe(&self) -> String {
        let where_ = if self.same_task() {
            "the same retriggered task"
        } else {
            "different tasks"
        };
        format!(
            "{} ({}): {} of {} failed on {}",
            self.test_name,
            self.job_type_name,
            self.failed_runs(),
            self.total_runs,
            where_
        )
    }
}

/// Push-health triage for a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushHealth {
    /// Failures already triaged as known intermittents.
    #[serde(default)]
    pub known_issues: Vec<HealthFailure>,
    /// Failures push health flags but nobody has triaged yet.
    #[serde(default)]
    pub need_investigation: Vec<HealthFailure>,
}

impl PushHealth {
    /// Merge several pushes' triage, deduplicating by (test, job type).
    /// Later entries replace earlier ones.
    pub fn combine<I>(pushes: I) -> Self
    where
        I: IntoIterator<Item = PushHealth>,
    {
        let mut known: BTreeMap<(String, String), HealthFailure> = BTreeMap::new();
        let mut investigate: BTreeMap<(String, String), HealthFailure> = BTreeMap::new();
        for push in pushes {
            for f in push.known_issues {
                let key = (f.test_name.clone(), f.job_type_name.clone());
                investigate.remove(&key);
                known.insert(key, f);
            }
            for f in push.need_investigation {
                let key = (f.test_name.clone(), f.job_type_name.clone());
                known.remove(&key);
                investigate.insert(key, f);
            }
        }
        Self {
            known_issues: known.into_values().collect(),
            need_investigation: investigate.into_values().collect(),
        }
    }

    pub fn known_for(&self, job_type: &str) -> impl Iterator<Item = &HealthFailure> {
        let job_type = job_type.to_string();
        self.known_issues
            .iter()
            .filter(move |f| f.job_type_name == job_type)
    }

    pub fn investigate_for(&self, job_type: &str) -> impl Iterator<Item = &HealthFailure> {
        let job_type = job_type.to_string();
        self.need_investigation
            .iter()
            .filter(move |f| f.job_type_name == job_type)
    }
}

/// Failure-classification names keyed by id.
pub type FailureClassifications = HashMap<u32, String>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn job(name: &str, task: &str, run: u32, result: CiJobResult) -> CiJob {
        CiJob {
            job_type_name: name.to_string(),
            task_id: task.to_string(),
            run_id: run,
            state: CiJobState::Completed,
            result,
            failure_classification_id: NOT_CLASSIFIED,
        }
    }

    pub fn pending(name: &str, task: &str) -> CiJob {
        CiJob {
            state: CiJobState::Pending,
            result: CiJobResult::Unknown,
            ..job(name, task, 0, CiJobResult::Unknown)
        }
    }

    pub fn health(test: &str, job_type: &str, failed: &[&str], total: u32) -> HealthFailure {
        HealthFailure {
            test_name: test.to_string(),
            job_type_name: job_type.to_string(),
            failed_task_ids: failed.iter().map(|s| s.to_string()).collect(),
            total_runs: total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn later_try_run_wins_for_same_identity() {
        let first = vec![
            pending("test-linux64/opt-gtest", "T1"),
            job("build-linux64/opt", "B1", 0, CiJobResult::Success),
        ];
        let second = vec![job("test-linux64/opt-gtest", "T1", 0, CiJobResult::TestFailed)];

        let combined = combine_results(vec![first, second]);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].task_id, "T1");
        assert_eq!(combined[0].result, CiJobResult::TestFailed);
    }

    #[test]
    fn reruns_are_distinct_identities() {
        let runs = vec![vec![
            job("test-a", "T1", 0, CiJobResult::TestFailed),
            job("test-a", "T1", 1, CiJobResult::Success),
        ]];
        assert_eq!(combine_results(runs).len(), 2);
    }

    #[test]
    fn retry_result_is_not_a_failure() {
        assert!(!job("test-a", "T1", 0, CiJobResult::Retry).failed());
        assert!(job("test-a", "T1", 0, CiJobResult::Busted).failed());
        assert!(!pending("test-a", "T1").failed());
    }

    #[test]
    fn job_categories_by_name() {
        assert!(job("build-win64/debug", "x", 0, CiJobResult::Success).is_build());
        assert!(job("source-test-mozlint-eslint", "x", 0, CiJobResult::Success).is_lint());
        assert!(job("Gecko Decision Task", "x", 0, CiJobResult::Success).is_decision_task());
    }

    #[test]
    fn health_description_distinguishes_tasks() {
        let same = health("dom/media/test_a.html", "test-m1", &["T1", "T1"], 3);
        assert_eq!(
            same.describe(),
            "dom/media/test_a.html (test-m1): 2 of 3 failed on the same retriggered task"
        );
        let diff = health("dom/media/test_a.html", "test-m1", &["T1", "T2"], 3);
        assert!(diff.describe().ends_with("2 of 3 failed on different tasks"));
    }

    #[test]
    fn health_combine_later_triage_wins() {
        let a = PushHealth {
            known_issues: vec![],
            need_investigation: vec![health("t", "j", &["T1"], 1)],
        };
        let b = PushHealth {
            known_issues: vec![health("t", "j", &["T1"], 1)],
            need_investigation: vec![],
        };
        let merged = PushHealth::combine(vec![a, b]);
        assert_eq!(merged.known_issues.len(), 1);
        assert!(merged.need_investigation.is_empty());
    }
}
