//! Completion gate: decides whether a combined result set can be classified.

use serde::{Deserialize, Serialize};

use crate::result::{CiJob, CiJobResult};

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    /// The CI system has not reported any jobs yet.
    NoResults,
    /// The decision task raised and nothing else was scheduled.
    DecisionTaskException,
    /// Some jobs have not reached a terminal state.
    Pending { pending: usize, total: usize },
    /// At least one build job failed.
    BuildFailed { failed_builds: Vec<String> },
    /// Everything finished and every build succeeded.
    Completed,
}

impl GateVerdict {
    /// The verdict ends the job (as opposed to waiting or proceeding).
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            GateVerdict::DecisionTaskException | GateVerdict::BuildFailed { .. }
        )
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, GateVerdict::NoResults | GateVerdict::Pending { .. })
    }
}

/// CI completion gate rules.
pub struct CiGate;

impl CiGate {
    /// Evaluate the combined job list of a try push.
    ///
    /// Gate rules, in order:
    /// - no jobs: wait
    /// - a lone decision task that raised: the push never scheduled anything
    /// - any job not terminal: wait
    /// - any build job failed: build failure
    pub fn evaluate(jobs: &[CiJob]) -> GateVerdict {
        if jobs.is_empty() {
            return GateVerdict::NoResults;
        }

        if let [only] = jobs {
            if only.is_decision_task() && only.is_terminal() && only.result == CiJobResult::Exception
            {
                return GateVerdict::DecisionTaskException;
            }
        }

        let pending = jobs.iter().filter(|j| !j.is_terminal()).count();
        if pending > 0 {
            return GateVerdict::Pending {
                pending,
                total: jobs.len(),
            };
        }

        let mut failed_builds: Vec<String> = jobs
            .iter()
            .filter(|j| j.is_build() && j.failed())
            .map(|j| j.job_type_name.clone())
            .collect();
        if !failed_builds.is_empty() {
            failed_builds.sort();
            failed_builds.dedup();
            return GateVerdict::BuildFailed { failed_builds };
        }

        GateVerdict::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::test_support::*;

    #[test]
    fn empty_list_waits() {
        assert_eq!(CiGate::evaluate(&[]), GateVerdict::NoResults);
    }

    #[test]
    fn lone_decision_exception() {
        let jobs = vec![job("Gecko Decision Task", "D", 0, CiJobResult::Exception)];
        let verdict = CiGate::evaluate(&jobs);
        assert_eq!(verdict, GateVerdict::DecisionTaskException);
        assert!(verdict.is_terminal_failure());
    }

    #[test]
    fn decision_exception_with_other_jobs_is_not_special() {
        let jobs = vec![
            job("Gecko Decision Task", "D", 0, CiJobResult::Exception),
            job("test-linux64/opt-xpcshell", "X", 0, CiJobResult::Success),
        ];
        assert_eq!(CiGate::evaluate(&jobs), GateVerdict::Completed);
    }

    #[test]
    fn pending_job_waits_even_if_build_failed() {
        let jobs = vec![
            job("build-linux64/opt", "B", 0, CiJobResult::Busted),
            pending("test-linux64/opt-gtest", "T"),
        ];
        let verdict = CiGate::evaluate(&jobs);
        assert_eq!(verdict, GateVerdict::Pending { pending: 1, total: 2 });
        assert!(verdict.is_waiting());
    }

    #[test]
    fn failed_build_after_completion() {
        let jobs = vec![
            job("build-linux64/opt", "B1", 0, CiJobResult::Busted),
            job("build-linux64/opt", "B1", 1, CiJobResult::Busted),
            job("test-linux64/opt-gtest", "T", 0, CiJobResult::TestFailed),
        ];
        assert_eq!(
            CiGate::evaluate(&jobs),
            GateVerdict::BuildFailed {
                failed_builds: vec!["build-linux64/opt".to_string()]
            }
        );
    }

    #[test]
    fn test_failures_alone_pass_the_gate() {
        let jobs = vec![
            job("build-linux64/opt", "B", 0, CiJobResult::Success),
            job("test-linux64/opt-gtest", "T", 0, CiJobResult::TestFailed),
        ];
        assert_eq!(CiGate::evaluate(&jobs), GateVerdict::Completed);
    }
}
