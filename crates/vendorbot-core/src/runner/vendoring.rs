//! Vendoring runner.
//!
//! A job moves through
//! `CREATED -> AWAITING_INITIAL_PLATFORM_TRY_RESULTS ->
//! AWAITING_SECOND_PLATFORMS_TRY_RESULTS -> (AWAITING_RETRIGGER_RESULTS) -> DONE`.
//! Each invocation advances the active job by at most one status, then
//! starts a new job if upstream moved past it and the frequency policy
//! allows.

use tracing::{debug, info};
use vendorbot_ci::{combine_results, PlatformFilter};
use vendorbot_state::{Job, JobOutcome, JobStatus, JobType, NewJob, ReviewPurpose, TryRunPurpose};

use super::shared::{Aggregate, GateStep};
use super::TaskContext;
use crate::comments;
use crate::commit_diff::UpdateCheck;
use crate::domain::{short_revision, Result, VendorbotError};
use crate::obs;
use crate::providers::{VendorOutcome, VendorResult};
use crate::retry::with_retry;
use crate::update_cache::{Candidate, UpdateCache};

/// Process the library's vendoring task once.
pub async fn run(ctx: &TaskContext<'_>, cache: &mut UpdateCache) -> Result<()> {
    let store = &*ctx.providers.store;
    let library = ctx.library.name.as_str();

    let history = store
        .jobs_for_library(library, JobType::Vendoring, true)
        .await?;
    let mut active: Vec<Job> = history.iter().filter(|j| j.is_active()).cloned().collect();
    if active.len() > 1 {
        return Err(VendorbotError::MultipleActiveJobs {
            library: library.to_string(),
            job_type: JobType::Vendoring.to_string(),
            count: active.len(),
        });
    }
    let mut current = active.pop();

    let candidate = cache.candidate(ctx).await?;
    let check = match &candidate {
        Some(c) => Some(cache.diff(ctx, &c.revision, &history).await?),
        None => None,
    };

    if let Some(job) = current.as_mut() {
        process_existing(ctx, job, check.as_ref()).await?;
    }

    let (Some(candidate), Some(check)) = (candidate, check) else {
        debug!(library, "up to date");
        return Ok(());
    };
    if store
        .job_by_version(library, JobType::Vendoring, &candidate.revision)
        .await?
        .is_some()
    {
        debug!(library, version = %candidate.revision, "job already exists for upstream head");
        return Ok(());
    }
    if check.is_empty() {
        return Ok(());
    }
    let most_recent = history.iter().max_by_key(|j| j.id);
    if !ctx.frequency_allows(&check, most_recent) {
        return Ok(());
    }

    start_job(ctx, &candidate, &check, current).await
}

/// Advance an existing job according to its persisted status.
pub async fn process_existing(
    ctx: &TaskContext<'_>,
    job: &mut Job,
    check: Option<&UpdateCheck>,
) -> Result<()> {
    let open = ctx.ticket_open(job).await?;
    debug!(job_id = %job.id, status = %job.status, ticket_open = open, "processing existing job");

    match job.status {
        JobStatus::Created => {
            ctx.fail(
                job,
                JobOutcome::UnexpectedCreatedStatus,
                "A previous run was interrupted while this job was being created, so it cannot be resumed.",
            )
            .await?;
            Err(VendorbotError::UnexpectedCreatedStatus {
                job_id: job.id.as_u64(),
                library: job.library_name.clone(),
            })
        }
        JobStatus::Done => {
            if open && job.outcome.tracks_release_impact() {
                if let Some(check) = check {
                    ctx.reconcile_release(job, check).await?;
                }
            }
            Ok(())
        }
        JobStatus::Relinquished => {
            debug!(job_id = %job.id, "relinquished job, nothing to do");
            Ok(())
        }
        JobStatus::AwaitingInitialPlatformTryResults => awaiting_initial(ctx, job, open).await,
        JobStatus::AwaitingSecondPlatformsTryResults => awaiting_second(ctx, job, open).await,
        JobStatus::AwaitingRetriggerResults => awaiting_retrigger(ctx, job).await,
    }
}

fn missing_try_run(job: &Job, purpose: TryRunPurpose) -> VendorbotError {
    VendorbotError::MissingTryRun {
        job_id: job.id.as_u64(),
        status: job.status.to_string(),
        purpose: purpose.to_string(),
    }
}

async fn start_job(
    ctx: &TaskContext<'_>,
    candidate: &Candidate,
    check: &UpdateCheck,
    prior: Option<Job>,
) -> Result<()> {
    let commits = ctx.relevant_commits(&check.unseen).await?;
    if commits.is_empty() {
        info!(library = %ctx.library.name, "no unseen commit passes the task filter");
        return Ok(());
    }

    let ticket = ctx.file_ticket(candidate, check, &commits, None).await?;
    // The prior job is relinquished before the new one exists, so a crash
    // in between never leaves two active jobs.
    let notes = match prior {
        Some(mut prior) => ctx.supersede(&mut prior, Some(ticket)).await?,
        None => Vec::new(),
    };
    let mut job = ctx
        .providers
        .store
        .create_job(NewJob {
            library_name: ctx.library.name.clone(),
            job_type: JobType::Vendoring,
            version: candidate.revision.clone(),
            status: JobStatus::Created,
            outcome: JobOutcome::Pending,
            ticket_id: Some(ticket),
            release: Some(ctx.settings.current_release.clone()),
        })
        .await?;
    obs::emit_job_created(&job.library_name, job.job_type, job.id, &job.version);
    ctx.tally.job_created();

    ctx.report_supersede_notes(&job, &notes).await;

    let Some(vendored) = vendor(ctx, &mut job, JobOutcome::CouldNotVendor).await? else {
        return Ok(());
    };
    if !commit_update(ctx, &mut job).await? {
        return Ok(());
    }

    if vendored.result == VendorResult::CouldNotVendorAllFiles {
        if !submit_review(ctx, &mut job).await? {
            return Ok(());
        }
        return ctx
            .fail(
                &mut job,
                JobOutcome::CouldNotVendorAllFiles,
                &comments::vendored_with_leftovers(&vendored.message),
            )
            .await;
    }

    let platform = PlatformFilter::Only(ctx.task.initial_platform.clone());
    let Some(try_rev) = submit_try(ctx, &mut job, &platform).await? else {
        return Ok(());
    };
    job.record_try_run(&try_rev, TryRunPurpose::InitialPlatform);
    ctx.save(&job).await?;

    if !submit_review(ctx, &mut job).await? {
        return Ok(());
    }
    ctx.advance(&mut job, JobStatus::AwaitingInitialPlatformTryResults)
        .await?;
    let push_url = ctx.providers.ci.push_url(&try_rev);
    ctx.comment(&job, &comments::try_submitted(&push_url), None, None)
        .await
}

/// Run the vendoring tool at the job's version. `None` means the job ended
/// with `failure`.
async fn vendor(
    ctx: &TaskContext<'_>,
    job: &mut Job,
    failure: JobOutcome,
) -> Result<Option<VendorOutcome>> {
    let detail = match ctx.providers.vendor.vendor(ctx.library, &job.version).await {
        Ok(outcome) if outcome.result != VendorResult::Failed => return Ok(Some(outcome)),
        Ok(outcome) => outcome.message,
        Err(e) => e.to_string(),
    };
    ctx.fail(job, failure, &comments::step_failed("vendor the update", &detail))
        .await?;
    Ok(None)
}

/// Commit the vendored files, then the local patches if the library has
/// any. Returns `false` when the job ended.
async fn commit_update(ctx: &TaskContext<'_>, job: &mut Job) -> Result<bool> {
    let vcs = &*ctx.providers.vcs;
    let prefix = job
        .ticket_id
        .map(|t| format!("Bug {t} - "))
        .unwrap_or_default();
    let short = short_revision(&job.version);
    let message = format!("{prefix}Update {} to {short}", ctx.library.name);
    if let Err(e) = vcs.commit(&message).await {
        let text = comments::step_failed("commit the vendored update", &e.to_string());
        ctx.fail(job, JobOutcome::CouldNotCommit, &text).await?;
        return Ok(false);
    }

    if ctx.library.has_patches {
        let applied = match ctx.providers.vendor.apply_patches(ctx.library).await {
            Ok(()) => {
                let message = format!("{prefix}Apply local patches to {}", ctx.library.name);
                vcs.commit(&message).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            let text = comments::step_failed("apply and commit the local patches", &e.to_string());
            ctx.fail(job, JobOutcome::CouldNotCommitPatches, &text)
                .await?;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Push the monorepo commits to CI. `None` means the job ended.
async fn submit_try(
    ctx: &TaskContext<'_>,
    job: &mut Job,
    platform: &PlatformFilter,
) -> Result<Option<String>> {
    // A retried submission could schedule a second push, so it runs once.
    match ctx.providers.ci.submit_to_ci(&ctx.library.name, platform).await {
        Ok(revision) => {
            info!(job_id = %job.id, selector = %platform.selector(), try_revision = %revision, "try run submitted");
            Ok(Some(revision))
        }
        Err(e) => {
            let text = comments::step_failed("submit the update to try", &e.to_string());
            ctx.fail(job, JobOutcome::CouldNotSubmitToTry, &text).await?;
            Ok(None)
        }
    }
}

/// Submit the monorepo commits for review and record the submissions.
/// Returns `false` when the job ended.
async fn submit_review(ctx: &TaskContext<'_>, job: &mut Job) -> Result<bool> {
    let Some(ticket) = job.ticket_id else {
        return Ok(true);
    };
    match ctx
        .providers
        .review
        .submit(ticket, ctx.library.has_patches)
        .await
    {
        Ok(ids) => {
            for (i, id) in ids.into_iter().enumerate() {
                let purpose = if i == 0 {
                    ReviewPurpose::Vendoring
                } else {
                    ReviewPurpose::Patches
                };
                job.record_review_submission(id, purpose);
            }
            ctx.save(job).await?;
            Ok(true)
        }
        Err(e) => {
            let text = comments::step_failed("submit the update for review", &e.to_string());
            ctx.fail(job, JobOutcome::CouldNotSubmitToPhab, &text).await?;
            Ok(false)
        }
    }
}

async fn awaiting_initial(ctx: &TaskContext<'_>, job: &mut Job, ticket_open: bool) -> Result<()> {
    let run = job
        .try_run(TryRunPurpose::InitialPlatform)
        .cloned()
        .ok_or_else(|| missing_try_run(job, TryRunPurpose::InitialPlatform))?;
    let ci = &*ctx.providers.ci;
    let rev = run.revision.as_str();
    let results =
        with_retry(ctx.retry(), "ci.get_job_results", move || ci.get_job_results(rev)).await?;
    let jobs = combine_results([results]);
    let push_url = ci.push_url(rev);

    if ctx.apply_gate(job, &jobs, &push_url).await? != GateStep::Proceed {
        return Ok(());
    }

    if !ticket_open {
        info!(job_id = %job.id, "ticket closed, classifying the initial run only");
        let health =
            with_retry(ctx.retry(), "ci.get_push_health", move || ci.get_push_health(rev))
                .await?;
        let aggregate = Aggregate {
            jobs,
            health,
            push_url,
        };
        let classification = ctx.classify(&aggregate).await?;
        return ctx
            .finalize(job, &classification, &aggregate.push_url)
            .await;
    }

    // The monorepo was reset after the previous run; rebuild the commits.
    if vendor(ctx, job, JobOutcome::CouldNotRevendor).await?.is_none() {
        return Ok(());
    }
    if !commit_update(ctx, job).await? {
        return Ok(());
    }
    let platform = PlatformFilter::AllExcept(ctx.task.initial_platform.clone());
    let Some(try_rev) = submit_try(ctx, job, &platform).await? else {
        return Ok(());
    };
    job.record_try_run(&try_rev, TryRunPurpose::MorePlatforms);
    ctx.advance(job, JobStatus::AwaitingSecondPlatformsTryResults)
        .await?;
    let push_url = ci.push_url(&try_rev);
    ctx.comment(job, &comments::more_platforms_submitted(&push_url), None, None)
        .await
}

async fn awaiting_second(ctx: &TaskContext<'_>, job: &mut Job, ticket_open: bool) -> Result<()> {
    if job.try_run(TryRunPurpose::MorePlatforms).is_none() {
        return Err(missing_try_run(job, TryRunPurpose::MorePlatforms));
    }
    let aggregate = ctx.aggregate(job).await?;
    if ctx.apply_gate(job, &aggregate.jobs, &aggregate.push_url).await? != GateStep::Proceed {
        return Ok(());
    }

    let classification = ctx.classify(&aggregate).await?;
    let retriggers = classification.retriggers();
    if retriggers.is_empty() || !ticket_open {
        return ctx
            .finalize(job, &classification, &aggregate.push_url)
            .await;
    }

    // Retriggering adds runs; it is not repeated on failure.
    ctx.providers.ci.retrigger(&retriggers).await?;
    for request in &retriggers {
        obs::emit_retrigger_requested(job.id, &request.job_type_name, request.times);
    }
    ctx.advance(job, JobStatus::AwaitingRetriggerResults).await?;
    ctx.comment(
        job,
        &comments::retriggered(&retriggers, &aggregate.push_url),
        None,
        None,
    )
    .await
}

async fn awaiting_retrigger(ctx: &TaskContext<'_>, job: &mut Job) -> Result<()> {
    let aggregate = ctx.aggregate(job).await?;
    if ctx.apply_gate(job, &aggregate.jobs, &aggregate.push_url).await? != GateStep::Proceed {
        return Ok(());
    }
    let classification = ctx.classify(&aggregate).await?;
    ctx.finalize(job, &classification, &aggregate.push_url)
        .await
}
