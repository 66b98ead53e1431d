//! Structured lifecycle events and spans.
//!
//! Every event carries an `event` field so log pipelines can filter on it,
//! e.g. `event=job.transition`.

use tracing::{info, info_span, warn, Span};
use vendorbot_state::{JobId, JobOutcome, JobStatus, JobType};

/// Span covering one library's processing within a run.
pub fn library_span(run_id: &str, library: &str) -> Span {
    info_span!("vendorbot.library", run_id = %run_id, library = %library)
}

/// Child span covering one task of a library.
pub fn task_span(library: &str, job_type: JobType) -> Span {
    info_span!("vendorbot.task", library = %library, job_type = %job_type)
}

pub fn emit_run_started(run_id: &str, libraries: usize) {
    info!(event = "run.started", run_id = %run_id, libraries);
}

pub fn emit_run_finished(run_id: &str, processed: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        processed,
        failed,
        duration_ms,
    );
}

pub fn emit_job_created(library: &str, job_type: JobType, job_id: JobId, version: &str) {
    info!(
        event = "job.created",
        library = %library,
        job_type = %job_type,
        job_id = %job_id,
        version = %version,
    );
}

pub fn emit_job_transition(job_id: JobId, from: JobStatus, to: JobStatus, outcome: JobOutcome) {
    info!(
        event = "job.transition",
        job_id = %job_id,
        from = %from,
        to = %to,
        outcome = %outcome,
    );
}

pub fn emit_retrigger_requested(job_id: JobId, job_type_name: &str, times: u32) {
    info!(
        event = "ci.retrigger_requested",
        job_id = %job_id,
        job_type_name = %job_type_name,
        times,
    );
}

/// A library's processing failed; the run continues with the next one.
pub fn emit_library_failed(library: &str, error: &dyn std::fmt::Display) {
    warn!(event = "library.failed", library = %library, error = %error);
}

pub fn emit_abandon_failed(job_id: JobId, submission: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "review.abandon_failed",
        job_id = %job_id,
        submission = %submission,
        error = %error,
    );
}
