//! Per-run memo of upstream lookups and commit diffs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use vendorbot_state::{Job, JobType};

use crate::commit_diff::{check_for_update, UpdateCheck};
use crate::domain::{Library, Result, Task};
use crate::retry::with_retry;
use crate::runner::TaskContext;

/// Newest upstream revision reported by the vendoring tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub revision: String,
    pub timestamp: DateTime<Utc>,
}

/// Lives for one driver run; nothing is persisted.
#[derive(Debug, Default)]
pub struct UpdateCache {
    upstream: HashMap<(String, Option<String>), Option<Candidate>>,
    diffs: HashMap<(String, JobType, String), UpdateCheck>,
}

impl UpdateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest upstream revision for the task's branch, if newer than in-tree.
    pub async fn candidate(
        &mut self,
        ctx: &TaskContext<'_>,
    ) -> Result<Option<Candidate>> {
        let key = (ctx.library.name.clone(), ctx.task.branch.clone());
        if let Some(hit) = self.upstream.get(&key) {
            return Ok(hit.clone());
        }
        let candidate = lookup(ctx, ctx.library, ctx.task).await?;
        self.upstream.insert(key, candidate.clone());
        Ok(candidate)
    }

    /// New and unseen commits up to `target` for the context's task stream.
    pub async fn diff(
        &mut self,
        ctx: &TaskContext<'_>,
        target: &str,
        prior_jobs: &[Job],
    ) -> Result<UpdateCheck> {
        let key = (ctx.library.name.clone(), ctx.task.job_type, target.to_string());
        if let Some(hit) = self.diffs.get(&key) {
            debug!(library = %ctx.library.name, target, "update check cache hit");
            return Ok(hit.clone());
        }
        let check = check_for_update(
            ctx.providers.vcs.as_ref(),
            ctx.repo,
            ctx.library,
            target,
            prior_jobs,
        )
        .await?;
        self.diffs.insert(key, check.clone());
        Ok(check)
    }
}

async fn lookup(ctx: &TaskContext<'_>, library: &Library, task: &Task) -> Result<Option<Candidate>> {
    let vendor = &*ctx.providers.vendor;
    let branch = task.branch.as_deref();
    let found = with_retry(ctx.retry(), "vendor.check_for_update", move || {
        vendor.check_for_update(library, branch)
    })
    .await?;
    Ok(found.map(|(revision, timestamp)| Candidate {
        revision,
        timestamp,
    }))
}
