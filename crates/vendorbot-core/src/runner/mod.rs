//! Task runners: one state machine per task type.
//!
//! Runners are invoked once per (library, task) per run. Everything they
//! learn is persisted on the job before the next external call, so a run
//! interrupted at any point resumes from the last saved status.

pub mod commit_alert;
mod shared;
pub mod vendoring;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tracing::info;
use vendorbot_state::Job;

use crate::commit_diff::UpdateCheck;
use crate::domain::{Library, Task};
use crate::driver::RunSettings;
use crate::frequency::{should_process, GateInput};
use crate::providers::Providers;

/// Counters shared by every runner of one run.
#[derive(Debug, Default)]
pub struct Tally {
    jobs_created: AtomicUsize,
    transitions: AtomicUsize,
}

impl Tally {
    pub fn job_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_created(&self) -> usize {
        self.jobs_created.load(Ordering::Relaxed)
    }

    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::Relaxed)
    }
}

/// Everything a runner needs for one (library, task) pair.
pub struct TaskContext<'a> {
    pub providers: &'a Providers,
    pub settings: &'a RunSettings,
    pub library: &'a Library,
    pub task: &'a Task,
    /// Scratch clone of the library's upstream.
    pub repo: &'a Path,
    pub tally: &'a Tally,
}

impl TaskContext<'_> {
    /// Apply the task's frequency policy to a candidate update.
    pub(crate) fn frequency_allows(&self, check: &UpdateCheck, most_recent: Option<&Job>) -> bool {
        let input = GateInput {
            most_recent,
            current_release: &self.settings.current_release,
            commits_since_in_tree: check.all_new.len(),
            commits_since_last_job: check.unseen.len(),
            now: Utc::now(),
        };
        let allowed = should_process(self.task, &input);
        if !allowed {
            info!(
                library = %self.library.name,
                frequency = %self.task.frequency,
                new = check.all_new.len(),
                unseen = check.unseen.len(),
                "frequency policy says not yet"
            );
        }
        allowed
    }
}
