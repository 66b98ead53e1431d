//! Git-backed [`VersionControl`] adapter.
//!
//! Upstream history is read from a scratch clone; vendoring commits are made
//! in the monorepo working tree configured at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::checkout::ScratchCheckout;
use crate::domain::{Commit, CommitDetails, Library, ProviderError, UpstreamHost};
use crate::process::{run_checked, DEFAULT_COMMAND_TIMEOUT};
use crate::providers::{CommitQuery, ProviderResult, VersionControl};

/// Git subprocess adapter.
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    monorepo: PathBuf,
    /// Ref the monorepo is reset to after each library; `HEAD` when unset.
    base_ref: Option<String>,
    timeout: Duration,
}

impl GitVersionControl {
    pub fn new(monorepo: impl Into<PathBuf>) -> Self {
        Self {
            monorepo: monorepo.into(),
            base_ref: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = Some(base_ref.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn monorepo(&self) -> &Path {
        &self.monorepo
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> ProviderResult<String> {
        run_checked("git", args, repo, self.timeout).await
    }

    async fn host_of(&self, repo: &Path) -> UpstreamHost {
        match self.git(repo, &["remote", "get-url", "origin"]).await {
            Ok(url) => UpstreamHost::from_url(&url),
            Err(_) => UpstreamHost::Generic,
        }
    }
}

fn parse_date(raw: &str) -> ProviderResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ProviderError::protocol("git", format!("bad date {raw:?}: {e}")))
}

/// Parse `git diff-tree --name-status` output into the four file buckets.
fn parse_name_status(output: &str, details: &mut CommitDetails) {
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split('\t');
        let status = fields.next().unwrap_or_default();
        // Renames and copies list old and new path; keep the new one.
        let Some(path) = fields.last() else { continue };
        let path = path.to_string();
        match status.chars().next() {
            Some('A') => details.added.push(path),
            Some('M') => details.modified.push(path),
            Some('D') => details.deleted.push(path),
            _ => details.other.push(path),
        }
    }
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn clone_upstream(&self, library: &Library) -> ProviderResult<ScratchCheckout> {
        let checkout = ScratchCheckout::create(&library.name).map_err(|source| {
            ProviderError::Spawn {
                command: "create scratch directory".to_string(),
                source,
            }
        })?;
        let target = checkout.path().to_string_lossy().to_string();
        self.git(
            checkout.root(),
            &["clone", "--quiet", &library.upstream_url, &target],
        )
        .await?;
        info!(library = %library.name, "upstream cloned");
        Ok(checkout)
    }

    async fn commits_between(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
        query: CommitQuery,
    ) -> ProviderResult<Vec<Commit>> {
        if from == to {
            return Ok(Vec::new());
        }
        let range = format!("{from}..{to}");
        let mut args = vec![
            "log",
            "--topo-order",
            "--reverse",
            "--format=%H%x09%aI%x09%cI",
        ];
        if !query.include_merges {
            args.push("--no-merges");
        }
        args.push(&range);

        let output = self.git(repo, &args).await?;
        let host = self.host_of(repo).await;
        let mut commits = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.split('\t');
            let (Some(rev), Some(authored), Some(committed)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(ProviderError::protocol("git", format!("bad log line {line:?}")));
            };
            commits.push(Commit::new(
                rev,
                parse_date(authored)?,
                parse_date(committed)?,
                host.clone(),
            ));
        }
        debug!(from, to, count = commits.len(), "commits between");
        Ok(commits)
    }

    async fn merge_base(&self, repo: &Path, a: &str, b: &str) -> ProviderResult<String> {
        self.git(repo, &["merge-base", a, b]).await
    }

    async fn populate_details(&self, repo: &Path, commits: &mut [Commit]) -> ProviderResult<()> {
        for commit in commits.iter_mut().filter(|c| !c.is_populated()) {
            let header = self
                .git(repo, &["show", "-s", "--format=%an%x09%s", &commit.revision])
                .await?;
            let (author, summary) = header.split_once('\t').unwrap_or((header.as_str(), ""));
            let mut details = CommitDetails {
                author: author.to_string(),
                summary: summary.to_string(),
                ..Default::default()
            };
            let files = self
                .git(
                    repo,
                    &[
                        "diff-tree",
                        "--no-commit-id",
                        "--root",
                        "-r",
                        "-M",
                        "--name-status",
                        &commit.revision,
                    ],
                )
                .await?;
            parse_name_status(&files, &mut details);
            commit.set_details(details);
        }
        Ok(())
    }

    async fn commit(&self, message: &str) -> ProviderResult<()> {
        self.git(&self.monorepo, &["add", "-A"]).await?;
        self.git(&self.monorepo, &["commit", "--quiet", "-m", message])
            .await?;
        Ok(())
    }

    async fn diff_stat(&self) -> ProviderResult<String> {
        self.git(&self.monorepo, &["diff", "--stat", "HEAD"]).await
    }

    async fn reset_working_tree(&self) -> ProviderResult<()> {
        let target = self.base_ref.as_deref().unwrap_or("HEAD");
        self.git(&self.monorepo, &["reset", "--quiet", "--hard", target])
            .await?;
        self.git(&self.monorepo, &["clean", "-fdq"]).await?;
        debug!(target, "monorepo reset");
        Ok(())
    }
}
