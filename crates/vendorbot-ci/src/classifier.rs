//! Failure classification and retrigger decisions for a completed push.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::result::{CiJob, FailureClassifications, HealthFailure, PushHealth, NOT_CLASSIFIED};

/// Runs of a failing job type we want before a human looks at it.
pub const TOTAL_ATTEMPTS: usize = 3;

/// All failing runs of one job type, with whatever push health said about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureGroup {
    pub job_type_name: String,
    pub failed_runs: Vec<CiJob>,
    pub total_runs: usize,
    pub tests: Vec<HealthFailure>,
}

impl FailureGroup {
    fn line(&self) -> String {
        format!(
            "{}: {} of {} runs failed",
            self.job_type_name,
            self.failed_runs.len(),
            self.total_runs
        )
    }
}

/// Ask the CI system to run a task `times` more times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetriggerRequest {
    pub job_type_name: String,
    pub task_id: String,
    pub times: u32,
}

/// Failures of a completed push sorted into buckets keyed by job type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Every failing test was already triaged as a known intermittent.
    pub known_issues: BTreeMap<String, FailureGroup>,
    /// Every failing run carries a failure classification from the CI system.
    pub taskcluster_classified: BTreeMap<String, FailureGroup>,
    /// Push health flagged at least one failing test nobody has triaged.
    pub to_investigate: BTreeMap<String, FailureGroup>,
    /// Failed, and push health has no opinion.
    pub unknown_failures: BTreeMap<String, FailureGroup>,
    /// Lint job types that failed; informational only.
    pub lint_failures: Vec<String>,
}

fn externally_classified(job: &CiJob, names: &FailureClassifications) -> bool {
    if job.failure_classification_id == NOT_CLASSIFIED || job.failure_classification_id == 0 {
        return false;
    }
    match names.get(&job.failure_classification_id) {
        Some(name) => !name.to_ascii_lowercase().contains("not classified"),
        None => true,
    }
}

impl Classification {
    /// Bucket every failing non-lint job type.
    ///
    /// Precedence per job type: externally classified, then needs
    /// investigation, then known issues, then unknown.
    pub fn classify(jobs: &[CiJob], health: &PushHealth, names: &FailureClassifications) -> Self {
        let mut out = Classification::default();
        let mut by_type: BTreeMap<&str, Vec<&CiJob>> = BTreeMap::new();
        for job in jobs.iter().filter(|j| !j.is_decision_task()) {
            by_type.entry(job.job_type_name.as_str()).or_default().push(job);
        }

        for (job_type, runs) in by_type {
            let failed: Vec<CiJob> = runs.iter().filter(|j| j.failed()).map(|j| (*j).clone()).collect();
            if failed.is_empty() {
                continue;
            }
            if runs[0].is_lint() {
                out.lint_failures.push(job_type.to_string());
                continue;
            }

            let investigate: Vec<HealthFailure> = health.investigate_for(job_type).cloned().collect();
            let known: Vec<HealthFailure> = health.known_for(job_type).cloned().collect();
            let all_classified = failed.iter().all(|j| externally_classified(j, names));

            let mut group = FailureGroup {
                job_type_name: job_type.to_string(),
                failed_runs: failed,
                total_runs: runs.len(),
                tests: Vec::new(),
            };

            let bucket = if all_classified {
                &mut out.taskcluster_classified
            } else if !investigate.is_empty() {
                group.tests = investigate;
                group.tests.extend(known);
                &mut out.to_investigate
            } else if !known.is_empty() {
                group.tests = known;
                &mut out.known_issues
            } else {
                &mut out.unknown_failures
            };
            debug!(job_type, "classified failing job type");
            bucket.insert(job_type.to_string(), group);
        }
        out
    }

    /// Failures only a human can judge.
    pub fn needs_human(&self) -> bool {
        !self.to_investigate.is_empty() || !self.unknown_failures.is_empty()
    }

    /// Anything worth mentioning on the ticket at all.
    pub fn has_issues(&self) -> bool {
        self.needs_human()
            || !self.known_issues.is_empty()
            || !self.taskcluster_classified.is_empty()
            || !self.lint_failures.is_empty()
    }

    /// One request per needs-human job type still under [`TOTAL_ATTEMPTS`] runs,
    /// re-running its latest failed task the remaining number of times.
    pub fn retriggers(&self) -> Vec<RetriggerRequest> {
        self.to_investigate
            .values()
            .chain(self.unknown_failures.values())
            .filter(|g| g.total_runs < TOTAL_ATTEMPTS)
            .filter_map(|g| {
                let latest = g.failed_runs.iter().max_by_key(|j| j.run_id)?;
                Some(RetriggerRequest {
                    job_type_name: g.job_type_name.clone(),
                    task_id: latest.task_id.clone(),
                    times: (TOTAL_ATTEMPTS - g.total_runs) as u32,
                })
            })
            .collect()
    }

    /// Human-readable report of every bucket.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let sections: [(&str, &BTreeMap<String, FailureGroup>); 4] = [
            ("Needs investigation", &self.to_investigate),
            ("Unknown failures", &self.unknown_failures),
            ("Known issues", &self.known_issues),
            ("Classified by the CI system", &self.taskcluster_classified),
        ];
        for (title, bucket) in sections {
            if bucket.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{title}:");
            for group in bucket.values() {
                let _ = writeln!(out, "  - {}", group.line());
                for test in &group.tests {
                    let _ = writeln!(out, "    - {}", test.describe());
                }
            }
            out.push('\n');
        }
        if !self.lint_failures.is_empty() {
            let _ = writeln!(out, "Lint failures (informational, do not block landing):");
            for name in &self.lint_failures {
                let _ = writeln!(out, "  - {name}");
            }
        }
        out.trim_end().to_string()
    }
}
