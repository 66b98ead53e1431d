//! Commit-alert runner: files a ticket whenever upstream gains commits no
//! earlier alert covered. Jobs are created directly in DONE.

use tracing::{debug, info};
use vendorbot_state::{JobOutcome, JobStatus, JobType, NewJob, TicketId};

use super::TaskContext;
use crate::domain::{Result, VendorbotError};
use crate::obs;
use crate::retry::with_retry;
use crate::update_cache::{Candidate, UpdateCache};

/// Process the library's commit-alert task once.
pub async fn run(ctx: &TaskContext<'_>, cache: &mut UpdateCache) -> Result<()> {
    let store = &*ctx.providers.store;
    let library = ctx.library.name.as_str();

    let mut history = store
        .jobs_for_library(library, JobType::CommitAlert, true)
        .await?;
    let active = history.iter().filter(|j| j.is_active()).count();
    if active > 1 {
        return Err(VendorbotError::MultipleActiveJobs {
            library: library.to_string(),
            job_type: JobType::CommitAlert.to_string(),
            count: active,
        });
    }

    let Some(candidate) = cache.candidate(ctx).await? else {
        debug!(library, "up to date");
        return Ok(());
    };
    let check = cache.diff(ctx, &candidate.revision, &history).await?;

    let open = open_tickets(ctx, history.iter().filter_map(|j| j.ticket_id).collect()).await?;
    for job in history.iter_mut() {
        if job.ticket_id.is_some_and(|t| open.contains(&t)) {
            ctx.reconcile_release(job, &check).await?;
        }
    }

    let Some(newest) = check.newest_unseen() else {
        debug!(library, "no unseen commits");
        return Ok(());
    };
    if store
        .job_by_version(library, JobType::CommitAlert, &newest.revision)
        .await?
        .is_some()
    {
        debug!(library, version = %newest.revision, "already alerted");
        return Ok(());
    }
    let most_recent = history.iter().max_by_key(|j| j.id);
    if !ctx.frequency_allows(&check, most_recent) {
        return Ok(());
    }

    let commits = ctx.relevant_commits(&check.unseen).await?;
    let ticket = if commits.is_empty() {
        info!(library, "every unseen commit was filtered out, recording them as seen");
        None
    } else {
        let depends_on = history
            .iter()
            .rev()
            .filter_map(|j| j.ticket_id)
            .find(|t| open.contains(t));
        let target = Candidate {
            revision: newest.revision.clone(),
            timestamp: newest.commit_date,
        };
        Some(ctx.file_ticket(&target, &check, &commits, depends_on).await?)
    };

    // Earlier alerts stay open; they only stop being the active job.
    let mut notes = Vec::new();
    for prior in history.iter_mut().filter(|j| j.is_active()) {
        notes.extend(ctx.supersede(prior, None).await?);
    }

    let mut job = store
        .create_job(NewJob {
            library_name: library.to_string(),
            job_type: JobType::CommitAlert,
            version: newest.revision.clone(),
            status: JobStatus::Done,
            outcome: JobOutcome::AllSuccess,
            ticket_id: ticket,
            release: Some(ctx.settings.current_release.clone()),
        })
        .await?;
    obs::emit_job_created(library, JobType::CommitAlert, job.id, &job.version);
    ctx.tally.job_created();

    ctx.report_supersede_notes(&job, &notes).await;
    if job.ticket_id.is_some() {
        ctx.reconcile_release(&mut job, &check).await?;
    }
    Ok(())
}

async fn open_tickets(ctx: &TaskContext<'_>, tickets: Vec<TicketId>) -> Result<Vec<TicketId>> {
    if tickets.is_empty() {
        return Ok(Vec::new());
    }
    let bugs = &*ctx.providers.bugs;
    let query = tickets.as_slice();
    let open = with_retry(ctx.retry(), "bugs.find_open", move || bugs.find_open(query)).await?;
    Ok(open)
}
