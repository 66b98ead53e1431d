//! Steps shared by both runners: persistence, ticket comments, supersession,
//! release tracking, CI aggregation and final classification.

use tracing::{info, warn};
use vendorbot_ci::{combine_results, CiGate, CiJob, Classification, GateVerdict, PushHealth};
use vendorbot_state::{Job, JobOutcome, JobStatus, TicketId};

use super::TaskContext;
use crate::comments::{self, truncate_for_tracker};
use crate::commit_diff::UpdateCheck;
use crate::domain::{Commit, Result, VendorbotError};
use crate::obs;
use crate::providers::NewTicket;
use crate::retry::{with_retry, RetryPolicy};
use crate::update_cache::Candidate;

/// What the completion gate means for the current invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GateStep {
    /// Results are incomplete; check again next run.
    Wait,
    /// The gate ended the job.
    Ended,
    /// Everything finished without build failures.
    Proceed,
}

/// Combined results and triage across every try run of a job.
pub(crate) struct Aggregate {
    pub jobs: Vec<CiJob>,
    pub health: PushHealth,
    /// Push URL of the newest try run.
    pub push_url: String,
}

impl TaskContext<'_> {
    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.settings.retry
    }

    pub(crate) async fn save(&self, job: &Job) -> Result<()> {
        self.providers.store.save_job(job).await?;
        Ok(())
    }

    /// Move to `status` and persist.
    pub(crate) async fn advance(&self, job: &mut Job, status: JobStatus) -> Result<()> {
        let from = job.status;
        job.transition(status);
        self.save(job).await?;
        obs::emit_job_transition(job.id, from, status, job.outcome);
        self.tally.transition();
        Ok(())
    }

    /// Move to DONE with `outcome` and persist.
    pub(crate) async fn finish(&self, job: &mut Job, outcome: JobOutcome) -> Result<()> {
        let from = job.status;
        job.finish(outcome);
        self.save(job).await?;
        obs::emit_job_transition(job.id, from, JobStatus::Done, outcome);
        self.tally.transition();
        Ok(())
    }

    /// The unseen commits the task's filter keeps. Details are populated for
    /// the ticket description either way.
    pub(crate) async fn relevant_commits(&self, unseen: &[Commit]) -> Result<Vec<Commit>> {
        let mut commits = unseen.to_vec();
        self.providers
            .vcs
            .populate_details(self.repo, &mut commits)
            .await?;
        Ok(self.task.filter.apply(commits))
    }

    /// File the ticket describing `commits` for a new job at `candidate`.
    pub(crate) async fn file_ticket(
        &self,
        candidate: &Candidate,
        check: &UpdateCheck,
        commits: &[Commit],
        depends_on: Option<TicketId>,
    ) -> Result<TicketId> {
        let job_type = self.task.job_type;
        let description = comments::ticket_description(
            self.library,
            job_type,
            &candidate.revision,
            commits,
            check.all_new.len(),
        );
        let ticket = NewTicket {
            product: self.library.bugzilla_product.clone(),
            component: self.library.bugzilla_component.clone(),
            summary: comments::ticket_summary(
                self.library,
                job_type,
                &candidate.revision,
                candidate.timestamp,
            ),
            description: truncate_for_tracker(&description),
            cc: self.task.cc.clone(),
            needinfo: self.task.needinfo.clone(),
            depends_on,
            blocks: self.task.blocking,
        };
        // Filing is not idempotent, so it is never retried.
        let id = self.providers.bugs.file(&ticket).await?;
        info!(library = %self.library.name, ticket = id, "ticket filed");
        Ok(id)
    }

    /// Comment on the job's ticket, if it has one.
    pub(crate) async fn comment(
        &self,
        job: &Job,
        text: &str,
        needinfo: Option<&str>,
        assignee: Option<&str>,
    ) -> Result<()> {
        let Some(ticket) = job.ticket_id else {
            return Ok(());
        };
        let text = truncate_for_tracker(text);
        let text = text.as_str();
        let bugs = &*self.providers.bugs;
        with_retry(self.retry(), "bugs.comment", move || {
            bugs.comment(ticket, text, needinfo, assignee)
        })
        .await?;
        Ok(())
    }

    /// End the job with a business failure and explain it on the ticket.
    pub(crate) async fn fail(&self, job: &mut Job, outcome: JobOutcome, text: &str) -> Result<()> {
        warn!(job_id = %job.id, library = %job.library_name, %outcome, "job failed");
        self.finish(job, outcome).await?;
        self.comment(job, text, None, None).await
    }

    /// Whether the job's ticket is still open. Jobs without a ticket count as closed.
    pub(crate) async fn ticket_open(&self, job: &Job) -> Result<bool> {
        let Some(ticket) = job.ticket_id else {
            return Ok(false);
        };
        let bugs = &*self.providers.bugs;
        let query = [ticket];
        let query = &query[..];
        let open =
            with_retry(self.retry(), "bugs.find_open", move || bugs.find_open(query)).await?;
        Ok(open.contains(&ticket))
    }

    /// Abandon every review submission not yet abandoned.
    ///
    /// Each submission is abandoned at most once. Failures do not stop the
    /// job; they are logged and listed in a separate ticket comment.
    pub(crate) async fn abandon_open_submissions(&self, job: &mut Job) -> Result<()> {
        let open: Vec<String> = job
            .open_review_submissions()
            .map(|r| r.id.clone())
            .collect();
        if open.is_empty() {
            return Ok(());
        }

        let review = &*self.providers.review;
        let mut failures = Vec::new();
        for id in open {
            let sub = id.as_str();
            match with_retry(self.retry(), "review.abandon", move || review.abandon(sub)).await {
                Ok(()) => job.mark_review_abandoned(&id),
                Err(e) => {
                    obs::emit_abandon_failed(job.id, &id, &e);
                    failures.push((id, e.to_string()));
                }
            }
        }
        self.save(job).await?;

        if !failures.is_empty() {
            let text = comments::abandon_failures(&failures);
            if let Err(e) = self.comment(job, &text, None, None).await {
                warn!(job_id = %job.id, error = %e, "could not report abandon failures");
            }
        }
        Ok(())
    }

    /// Retire `prior` before its replacement job is created.
    ///
    /// With `duplicate_of`, an open prior ticket is closed as a duplicate of
    /// that ticket. The prior job is relinquished and persisted even when
    /// closing or abandoning fails; those failures come back as notes for
    /// the replacement's ticket.
    pub(crate) async fn supersede(
        &self,
        prior: &mut Job,
        duplicate_of: Option<TicketId>,
    ) -> Result<Vec<String>> {
        let mut notes = Vec::new();
        if let (Some(old), Some(new)) = (prior.ticket_id, duplicate_of) {
            if let Err(e) = self.close_as_duplicate(prior, old, new).await {
                warn!(job_id = %prior.id, ticket = old, error = %e, "could not close superseded ticket");
                notes.push(format!("bug {old} could not be closed as a duplicate: {e}"));
            }
        }
        self.abandon_open_submissions(prior).await?;
        prior.relinquished = true;
        self.save(prior).await?;
        info!(job_id = %prior.id, ?duplicate_of, "job relinquished");
        Ok(notes)
    }

    async fn close_as_duplicate(&self, prior: &Job, old: TicketId, new: TicketId) -> Result<()> {
        if !self.ticket_open(prior).await? {
            return Ok(());
        }
        let text = comments::superseded(new);
        let text = text.as_str();
        let bugs = &*self.providers.bugs;
        with_retry(self.retry(), "bugs.close_as_duplicate", move || {
            bugs.close_as_duplicate(old, new, text)
        })
        .await?;
        Ok(())
    }

    /// Tell the replacement's ticket what superseding its predecessor left undone.
    pub(crate) async fn report_supersede_notes(&self, job: &Job, notes: &[String]) {
        if notes.is_empty() {
            return;
        }
        let text = comments::supersede_failures(notes);
        if let Err(e) = self.comment(job, &text, None, None).await {
            warn!(job_id = %job.id, error = %e, "could not report supersede failures");
        }
    }

    /// Mark the current release as affected by `job` when its version is
    /// among the new upstream commits. Returns whether anything changed.
    pub(crate) async fn reconcile_release(&self, job: &mut Job, check: &UpdateCheck) -> Result<bool> {
        let release = self.settings.current_release.as_str();
        if job.is_affected(release) || !check.contains(&job.version) {
            return Ok(false);
        }
        if let Some(ticket) = job.ticket_id {
            let bugs = &*self.providers.bugs;
            with_retry(self.retry(), "bugs.mark_release_affected", move || {
                bugs.mark_release_affected(ticket, release)
            })
            .await?;
        }
        job.mark_affected(release);
        self.save(job).await?;
        info!(job_id = %job.id, release, "release marked affected");
        Ok(true)
    }

    /// Fetch and combine results and triage of every try run, oldest first.
    pub(crate) async fn aggregate(&self, job: &Job) -> Result<Aggregate> {
        let ci = &*self.providers.ci;
        let mut runs = Vec::new();
        let mut triage = Vec::new();
        for run in &job.try_runs {
            let rev = run.revision.as_str();
            let results =
                with_retry(self.retry(), "ci.get_job_results", move || ci.get_job_results(rev))
                    .await?;
            let health =
                with_retry(self.retry(), "ci.get_push_health", move || ci.get_push_health(rev))
                    .await?;
            runs.push(results);
            triage.push(health);
        }
        let push_url = job
            .try_runs
            .last()
            .map(|r| ci.push_url(&r.revision))
            .unwrap_or_default();
        Ok(Aggregate {
            jobs: combine_results(runs),
            health: PushHealth::combine(triage),
            push_url,
        })
    }

    /// Apply the completion gate, ending the job on a decision-task
    /// exception or a failed build.
    pub(crate) async fn apply_gate(
        &self,
        job: &mut Job,
        jobs: &[CiJob],
        push_url: &str,
    ) -> Result<GateStep> {
        match CiGate::evaluate(jobs) {
            GateVerdict::NoResults => {
                info!(job_id = %job.id, "no CI results yet");
                Ok(GateStep::Wait)
            }
            GateVerdict::Pending { pending, total } => {
                info!(job_id = %job.id, pending, total, "CI still running");
                Ok(GateStep::Wait)
            }
            GateVerdict::DecisionTaskException => {
                self.fail(
                    job,
                    JobOutcome::CouldNotSubmitToTry,
                    &comments::decision_task_exception(push_url),
                )
                .await?;
                Ok(GateStep::Ended)
            }
            GateVerdict::BuildFailed { failed_builds } => {
                warn!(job_id = %job.id, ?failed_builds, "build failed");
                self.comment(job, &comments::build_failed(&failed_builds, push_url), None, None)
                    .await?;
                self.abandon_open_submissions(job).await?;
                self.finish(job, JobOutcome::BuildFailed).await?;
                Ok(GateStep::Ended)
            }
            GateVerdict::Completed => Ok(GateStep::Proceed),
        }
    }

    pub(crate) async fn classify(&self, aggregate: &Aggregate) -> Result<Classification> {
        let ci = &*self.providers.ci;
        let names = with_retry(self.retry(), "ci.failure_classifications", move || {
            ci.failure_classifications()
        })
        .await?;
        Ok(Classification::classify(&aggregate.jobs, &aggregate.health, &names))
    }

    /// Report the classification, set reviewers where the update can land,
    /// and end the job.
    pub(crate) async fn finalize(
        &self,
        job: &mut Job,
        classification: &Classification,
        push_url: &str,
    ) -> Result<()> {
        let report = comments::classification_report(classification, push_url);
        let maintainer = self.library.maintainer_bugzilla.as_str();

        if classification.needs_human() {
            self.comment(job, &report, Some(maintainer), Some(maintainer))
                .await?;
            return self.finish(job, JobOutcome::UnclassifiedFailures).await;
        }

        let classified = !classification.known_issues.is_empty()
            || !classification.taskcluster_classified.is_empty();
        let (outcome, assignee) = if classified {
            (JobOutcome::ClassifiedFailures, Some(maintainer))
        } else {
            (JobOutcome::AllSuccess, None)
        };
        self.comment(job, &report, None, assignee).await?;
        self.set_reviewers(job).await?;
        self.finish(job, outcome).await
    }

    /// Request review from the task's reviewer on every open submission.
    async fn set_reviewers(&self, job: &mut Job) -> Result<()> {
        let reviewer = self.library.reviewer_for(self.task);
        let reviewer = reviewer.as_str();
        let review = &*self.providers.review;
        let ids: Vec<String> = job
            .open_review_submissions()
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            let sub = id.as_str();
            let result = with_retry(self.retry(), "review.set_reviewer", move || {
                review.set_reviewer(sub, reviewer)
            })
            .await;
            if let Err(source) = result {
                self.finish(job, JobOutcome::CouldNotSetReviewer).await?;
                let text = comments::step_failed("set the reviewer", &source.to_string());
                if let Err(e) = self.comment(job, &text, None, None).await {
                    warn!(job_id = %job.id, error = %e, "could not report reviewer failure");
                }
                return Err(VendorbotError::ReviewerNotSet {
                    job_id: job.id.as_u64(),
                    submission: id,
                    source,
                });
            }
        }
        Ok(())
    }
}
