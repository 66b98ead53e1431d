//! Ticket descriptions and comment texts.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use vendorbot_ci::{Classification, RetriggerRequest};
use vendorbot_state::{JobType, TicketId};

use crate::domain::{short_revision, Commit, Library};

/// Largest comment the bug tracker accepts.
pub const TRACKER_COMMENT_LIMIT: usize = 65_535;

const TRUNCATION_NOTICE: &str = "\n\n[Comment truncated: it exceeded the bug tracker's size limit.]";

/// Cut `text` to [`TRACKER_COMMENT_LIMIT`] characters, ending with a notice
/// when anything was dropped.
pub fn truncate_for_tracker(text: &str) -> String {
    if text.chars().count() <= TRACKER_COMMENT_LIMIT {
        return text.to_string();
    }
    let keep = TRACKER_COMMENT_LIMIT - TRUNCATION_NOTICE.chars().count();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_NOTICE);
    out
}

/// One-line ticket summary.
pub fn ticket_summary(
    library: &Library,
    job_type: JobType,
    revision: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let short = short_revision(revision);
    match job_type {
        JobType::Vendoring => format!(
            "Update {} to new version {} from {}",
            library.name,
            short,
            timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        JobType::CommitAlert => format!(
            "New upstream commits in {} (up to {})",
            library.name, short
        ),
    }
}

fn commit_list(out: &mut String, commits: &[Commit]) {
    for commit in commits {
        let _ = write!(out, "- {} {}", commit.short(), commit.link());
        if let Some(details) = commit.details() {
            let _ = write!(out, "\n  {} (by {})", details.summary, details.author);
        }
        out.push('\n');
    }
}

/// Ticket description listing the commits the job covers.
///
/// `all_new_count` is the total number of commits since the in-tree
/// revision; `commits` are the unseen ones after task filters.
pub fn ticket_description(
    library: &Library,
    job_type: JobType,
    target: &str,
    commits: &[Commit],
    all_new_count: usize,
) -> String {
    let mut out = String::new();
    match job_type {
        JobType::Vendoring => {
            let _ = writeln!(
                out,
                "This update covers {} commits. Here are the ones not covered by a previous update:\n",
                all_new_count
            );
        }
        JobType::CommitAlert => {
            let _ = writeln!(
                out,
                "{} has {} new upstream commits since the in-tree revision. Not yet reported:\n",
                library.name, all_new_count
            );
        }
    }
    commit_list(&mut out, commits);

    let host = commits.first().map(|c| c.host());
    if let Some(url) = host.and_then(|h| h.compare_url(&library.in_tree_revision, target)) {
        let _ = write!(out, "\nFull diff since the in-tree revision: {url}\n");
    }
    out
}

pub fn try_submitted(push_url: &str) -> String {
    format!("I've submitted a try run for this commit: {push_url}")
}

pub fn more_platforms_submitted(push_url: &str) -> String {
    format!("The initial platform passed; remaining platforms are running at {push_url}")
}

pub fn build_failed(failed_builds: &[String], push_url: &str) -> String {
    let mut out = format!(
        "The try push {push_url} failed to build. Build jobs that failed:\n"
    );
    for name in failed_builds {
        let _ = writeln!(out, "- {name}");
    }
    out.push_str(
        "\nThe review submissions have been abandoned. When you have a fix, \
         vendor the update by hand and submit it for review yourself.",
    );
    out
}

pub fn decision_task_exception(push_url: &str) -> String {
    format!(
        "The decision task of try push {push_url} raised an exception, so no jobs were scheduled. \
         The update was not tested."
    )
}

/// Comment for a step that ended the job.
pub fn step_failed(step: &str, detail: &str) -> String {
    if detail.trim().is_empty() {
        format!("Could not {step}.")
    } else {
        format!("Could not {step}:\n\n{detail}")
    }
}

pub fn vendored_with_leftovers(message: &str) -> String {
    format!(
        "The update was vendored and submitted for review, but some files could not be \
         vendored automatically and need manual attention:\n\n{message}"
    )
}

/// Secondary comment listing review submissions that could not be abandoned.
pub fn abandon_failures(failures: &[(String, String)]) -> String {
    let mut out = String::from("Could not abandon these review submissions; please do it by hand:\n");
    for (submission, error) in failures {
        let _ = writeln!(out, "- {submission}: {error}");
    }
    out
}

pub fn superseded(new_ticket: TicketId) -> String {
    format!("This update is superseded by bug {new_ticket}.")
}

/// Cleanup of the superseded job that has to be finished by hand.
pub fn supersede_failures(notes: &[String]) -> String {
    let mut out = String::from("The update this bug replaces could not be fully retired:\n");
    for note in notes {
        let _ = writeln!(out, "- {note}");
    }
    out
}

pub fn retriggered(requests: &[RetriggerRequest], push_url: &str) -> String {
    let mut out = format!(
        "Some failures on {push_url} need a closer look; retriggering them to tell intermittents \
         from real regressions:\n"
    );
    for r in requests {
        let _ = writeln!(out, "- {} (x{})", r.job_type_name, r.times);
    }
    out
}

/// Final report for a job whose CI run finished.
pub fn classification_report(classification: &Classification, push_url: &str) -> String {
    let classified =
        !classification.known_issues.is_empty() || !classification.taskcluster_classified.is_empty();
    if !classification.needs_human() && !classified {
        let mut out = format!("All jobs on {push_url} passed. The update is ready for review.");
        if !classification.lint_failures.is_empty() {
            out.push_str("\n\n");
            out.push_str(&classification.summary());
        }
        return out;
    }
    let lead = if classification.needs_human() {
        "There are failures on the try run that need investigation"
    } else {
        "All failures on the try run are known or already classified"
    };
    format!("{lead} ({push_url}):\n\n{}", classification.summary())
}
