//! Run driver: iterates libraries and their tasks strictly in order.
//!
//! A library's failure is logged and recorded in the [`RunReport`]; it
//! never stops the remaining libraries. The monorepo working tree is reset
//! after every library, whether or not processing succeeded.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn, Instrument};
use uuid::Uuid;
use vendorbot_state::JobType;

use crate::commit_diff::UpdateCheck;
use crate::domain::{Commit, Library, Result};
use crate::obs;
use crate::providers::Providers;
use crate::retry::{with_retry, RetryPolicy};
use crate::runner::{commit_alert, vendoring, TaskContext, Tally};
use crate::update_cache::{Candidate, UpdateCache};

/// Settings that hold for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Release train new jobs are attributed to, e.g. `"140"`.
    pub current_release: String,
    pub retry: RetryPolicy,
}

/// A library whose processing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryFailure {
    pub library: String,
    pub error: String,
}

/// Summary of one driver invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub processed: Vec<String>,
    pub failed: Vec<LibraryFailure>,
    pub jobs_created: usize,
    pub transitions: usize,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What `check` found for one task of a library.
#[derive(Debug, Clone, Serialize)]
pub struct TaskCheck {
    pub job_type: JobType,
    pub candidate: Option<Candidate>,
    pub all_new: Vec<Commit>,
    pub unseen: Vec<Commit>,
}

pub struct Driver {
    providers: Providers,
    settings: RunSettings,
}

impl Driver {
    pub fn new(providers: Providers, settings: RunSettings) -> Self {
        Self {
            providers,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Process every library once.
    pub async fn run(&self, libraries: &[Library]) -> RunReport {
        let run_id = Uuid::new_v4();
        let run_label = run_id.to_string();
        let started = Instant::now();
        let mut report = RunReport {
            run_id,
            started_at: Utc::now(),
            processed: Vec::new(),
            failed: Vec::new(),
            jobs_created: 0,
            transitions: 0,
        };
        obs::emit_run_started(&run_label, libraries.len());

        let tally = Tally::default();
        let mut cache = UpdateCache::new();
        for library in libraries {
            let span = obs::library_span(&run_label, &library.name);
            let result = self
                .process_library(library, &mut cache, &tally)
                .instrument(span.clone())
                .await;

            if let Err(e) = self.providers.vcs.reset_working_tree().await {
                warn!(parent: &span, error = %e, "could not reset the monorepo");
            }

            match result {
                Ok(()) => report.processed.push(library.name.clone()),
                Err(e) => {
                    obs::emit_library_failed(&library.name, &e);
                    report.failed.push(LibraryFailure {
                        library: library.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.jobs_created = tally.jobs_created();
        report.transitions = tally.transitions();
        obs::emit_run_finished(
            &run_label,
            report.processed.len(),
            report.failed.len(),
            started.elapsed().as_millis() as u64,
        );
        report
    }

    async fn process_library(
        &self,
        library: &Library,
        cache: &mut UpdateCache,
        tally: &Tally,
    ) -> Result<()> {
        let vcs = &*self.providers.vcs;
        let checkout = with_retry(&self.settings.retry, "vcs.clone_upstream", move || {
            vcs.clone_upstream(library)
        })
        .await?;

        for task in &library.tasks {
            let ctx = TaskContext {
                providers: &self.providers,
                settings: &self.settings,
                library,
                task,
                repo: checkout.path(),
                tally,
            };
            let span = obs::task_span(&library.name, task.job_type);
            match task.job_type {
                JobType::Vendoring => vendoring::run(&ctx, cache).instrument(span).await?,
                JobType::CommitAlert => commit_alert::run(&ctx, cache).instrument(span).await?,
            }
        }
        info!(library = %library.name, "library processed");
        Ok(())
    }

    /// Report new and unseen commits per task without changing anything.
    pub async fn check(&self, library: &Library) -> Result<Vec<TaskCheck>> {
        let checkout = self.providers.vcs.clone_upstream(library).await?;
        let tally = Tally::default();
        let mut cache = UpdateCache::new();
        let mut out = Vec::new();

        for task in &library.tasks {
            let ctx = TaskContext {
                providers: &self.providers,
                settings: &self.settings,
                library,
                task,
                repo: checkout.path(),
                tally: &tally,
            };
            let candidate = cache.candidate(&ctx).await?;
            let check = match &candidate {
                Some(c) => {
                    let history = self
                        .providers
                        .store
                        .jobs_for_library(&library.name, task.job_type, true)
                        .await?;
                    cache.diff(&ctx, &c.revision, &history).await?
                }
                None => UpdateCheck::default(),
            };
            let UpdateCheck {
                all_new,
                mut unseen,
            } = check;
            self.providers
                .vcs
                .populate_details(checkout.path(), &mut unseen)
                .await?;
            out.push(TaskCheck {
                job_type: task.job_type,
                candidate,
                all_new,
                unseen,
            });
        }
        Ok(out)
    }
}
