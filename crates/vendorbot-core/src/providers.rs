//! Collaborator seams the task runners are written against.
//!
//! Every collaborator is an async trait object so the binary can inject the
//! real adapters and tests can inject the scripted fakes from [`crate::fakes`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vendorbot_ci::CiProvider;
use vendorbot_state::{JobStore, TicketId};

use crate::checkout::ScratchCheckout;
use crate::domain::{Commit, Library, ProviderError};

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Options for [`VersionControl::commits_between`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitQuery {
    pub include_merges: bool,
}

/// Read access to the upstream repository and write access to the monorepo.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone the library's upstream into a fresh scratch directory.
    async fn clone_upstream(&self, library: &Library) -> ProviderResult<ScratchCheckout>;

    /// Commits strictly after `from` up to and including `to`, oldest first.
    async fn commits_between(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
        query: CommitQuery,
    ) -> ProviderResult<Vec<Commit>>;

    async fn merge_base(&self, repo: &Path, a: &str, b: &str) -> ProviderResult<String>;

    /// Fill in summary, author and file lists. Already populated commits are skipped.
    async fn populate_details(&self, repo: &Path, commits: &mut [Commit]) -> ProviderResult<()>;

    /// Commit every pending change in the monorepo.
    async fn commit(&self, message: &str) -> ProviderResult<()>;

    /// Summary of uncommitted changes in the monorepo.
    async fn diff_stat(&self) -> ProviderResult<String>;

    /// Discard uncommitted changes and local commits in the monorepo.
    async fn reset_working_tree(&self) -> ProviderResult<()>;
}

/// Result of a vendoring attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorResult {
    Success,
    /// Vendoring finished but some files need manual handling.
    CouldNotVendorAllFiles,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorOutcome {
    pub result: VendorResult,
    pub message: String,
}

/// The in-tree vendoring tool.
#[async_trait]
pub trait VendorTool: Send + Sync {
    /// Newest upstream revision and its timestamp, or `None` when up to date.
    async fn check_for_update(
        &self,
        library: &Library,
        branch: Option<&str>,
    ) -> ProviderResult<Option<(String, DateTime<Utc>)>>;

    async fn vendor(&self, library: &Library, revision: &str) -> ProviderResult<VendorOutcome>;

    async fn apply_patches(&self, library: &Library) -> ProviderResult<()>;
}

/// Everything needed to file a ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub product: String,
    pub component: String,
    pub summary: String,
    pub description: String,
    pub cc: Vec<String>,
    pub needinfo: Vec<String>,
    pub depends_on: Option<TicketId>,
    pub blocks: Option<TicketId>,
}

/// Bug tracker.
#[async_trait]
pub trait BugTracker: Send + Sync {
    async fn file(&self, ticket: &NewTicket) -> ProviderResult<TicketId>;

    /// Post a comment. Callers truncate `text` to the tracker limit first.
    async fn comment(
        &self,
        ticket: TicketId,
        text: &str,
        needinfo: Option<&str>,
        assignee: Option<&str>,
    ) -> ProviderResult<()>;

    async fn close_as_wontfix(&self, ticket: TicketId, comment: &str) -> ProviderResult<()>;

    async fn close_as_duplicate(
        &self,
        ticket: TicketId,
        duplicate_of: TicketId,
        comment: &str,
    ) -> ProviderResult<()>;

    /// The subset of `tickets` that are still open.
    async fn find_open(&self, tickets: &[TicketId]) -> ProviderResult<Vec<TicketId>>;

    async fn mark_release_affected(&self, ticket: TicketId, release: &str) -> ProviderResult<()>;
}

/// Code review system.
#[async_trait]
pub trait CodeReview: Send + Sync {
    /// Submit the pending monorepo commits. Returns one submission id per
    /// commit: the vendoring commit first, then the patches commit.
    async fn submit(&self, ticket: TicketId, has_patches: bool) -> ProviderResult<Vec<String>>;

    async fn set_reviewer(&self, submission: &str, reviewer: &str) -> ProviderResult<()>;

    async fn abandon(&self, submission: &str) -> ProviderResult<()>;
}

/// Every collaborator, injected once per process.
#[derive(Clone)]
pub struct Providers {
    pub vcs: Arc<dyn VersionControl>,
    pub vendor: Arc<dyn VendorTool>,
    pub bugs: Arc<dyn BugTracker>,
    pub review: Arc<dyn CodeReview>,
    pub ci: Arc<dyn CiProvider>,
    pub store: Arc<dyn JobStore>,
}
