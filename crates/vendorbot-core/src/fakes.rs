//! Scripted in-memory collaborators for tests.
//!
//! Each fake records the calls it receives and answers from state the test
//! sets up beforehand. [`FakeWorld`] bundles one of each together with a
//! [`MemoryJobStore`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use vendorbot_ci::{
    CiError, CiJob, CiProvider, FailureClassifications, PlatformFilter, PushHealth,
    RetriggerRequest, NOT_CLASSIFIED,
};
use vendorbot_state::fakes::MemoryJobStore;
use vendorbot_state::{JobType, TicketId};

use crate::checkout::ScratchCheckout;
use crate::domain::{
    Commit, CommitDetails, CommitFilter, Frequency, Library, ProviderError, Task, UpstreamHost,
    DEFAULT_INITIAL_PLATFORM,
};
use crate::providers::{
    BugTracker, CodeReview, CommitQuery, NewTicket, ProviderResult, Providers, VendorOutcome,
    VendorResult, VendorTool, VersionControl,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fake_error(service: &str, message: &str) -> ProviderError {
    ProviderError::protocol(service, message)
}

/// A task with test-friendly defaults.
pub fn test_task(job_type: JobType, frequency: Frequency) -> Task {
    Task {
        job_type,
        frequency,
        branch: None,
        filter: CommitFilter::None,
        cc: vec!["watcher@example.com".to_string()],
        needinfo: vec![],
        blocking: None,
        reviewer: None,
        initial_platform: DEFAULT_INITIAL_PLATFORM.to_string(),
    }
}

/// A library on GitHub with a single vendoring task run on every invocation.
pub fn test_library(name: &str, in_tree_revision: &str) -> Library {
    Library {
        name: name.to_string(),
        upstream_url: format!("https://github.com/example/{name}"),
        in_tree_revision: in_tree_revision.to_string(),
        manifest_path: PathBuf::from(format!("third_party/{name}/moz.yaml")),
        maintainer_bugzilla: "maintainer@example.com".to_string(),
        maintainer_phabricator: "maintainer".to_string(),
        bugzilla_product: "Core".to_string(),
        bugzilla_component: "Audio/Video".to_string(),
        has_patches: false,
        tasks: vec![test_task(JobType::Vendoring, Frequency::Every)],
    }
}

// ---------------------------------------------------------------------------
// Version control
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VcsState {
    /// Upstream history, oldest first.
    history: Vec<String>,
    ranges: HashMap<(String, String), Vec<String>>,
    files: HashMap<String, Vec<String>>,
    commits: Vec<String>,
    resets: usize,
    fail_commit_containing: Option<String>,
}

/// Linear upstream history plus a record of monorepo commits.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn linear(revisions: &[&str]) -> Self {
        let vcs = Self::default();
        lock(&vcs.state).history = revisions.iter().map(|r| r.to_string()).collect();
        vcs
    }

    /// Extend upstream history.
    pub fn push(&self, revision: &str) {
        lock(&self.state).history.push(revision.to_string());
    }

    /// Answer `commits_between(from, to)` with `revisions` instead of history.
    pub fn override_range(&self, from: &str, to: &str, revisions: &[&str]) {
        lock(&self.state).ranges.insert(
            (from.to_string(), to.to_string()),
            revisions.iter().map(|r| r.to_string()).collect(),
        );
    }

    /// Files a commit touches; by default `src/<revision>.c` is modified.
    pub fn set_files(&self, revision: &str, files: &[&str]) {
        lock(&self.state).files.insert(
            revision.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        );
    }

    /// Make `commit` fail when the message contains `needle`.
    pub fn fail_commit_containing(&self, needle: &str) {
        lock(&self.state).fail_commit_containing = Some(needle.to_string());
    }

    /// Commit messages made in the monorepo, oldest first.
    pub fn commit_messages(&self) -> Vec<String> {
        lock(&self.state).commits.clone()
    }

    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    fn position(history: &[String], revision: &str) -> Option<usize> {
        history.iter().position(|r| r == revision)
    }

    fn make_commit(index: usize, revision: &str) -> Commit {
        let base = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let at = base + Duration::hours(index as i64);
        Commit::new(
            revision,
            at,
            at,
            UpstreamHost::GitHub("https://github.com/example/upstream".to_string()),
        )
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn clone_upstream(&self, library: &Library) -> ProviderResult<ScratchCheckout> {
        ScratchCheckout::create(&library.name).map_err(|source| ProviderError::Spawn {
            command: "create scratch directory".to_string(),
            source,
        })
    }

    async fn commits_between(
        &self,
        _repo: &Path,
        from: &str,
        to: &str,
        _query: CommitQuery,
    ) -> ProviderResult<Vec<Commit>> {
        let state = lock(&self.state);
        if let Some(revs) = state.ranges.get(&(from.to_string(), to.to_string())) {
            return Ok(revs
                .iter()
                .enumerate()
                .map(|(i, r)| Self::make_commit(i, r))
                .collect());
        }
        if from == to {
            return Ok(Vec::new());
        }
        let Some(end) = Self::position(&state.history, to) else {
            return Ok(Vec::new());
        };
        let start = Self::position(&state.history, from).map_or(0, |p| p + 1);
        Ok((start..=end)
            .map(|i| Self::make_commit(i, &state.history[i]))
            .collect())
    }

    async fn merge_base(&self, _repo: &Path, a: &str, b: &str) -> ProviderResult<String> {
        let state = lock(&self.state);
        match (
            Self::position(&state.history, a),
            Self::position(&state.history, b),
        ) {
            (Some(x), Some(y)) => Ok(state.history[x.min(y)].clone()),
            _ => Err(fake_error("git", &format!("no merge base for {a} and {b}"))),
        }
    }

    async fn populate_details(&self, _repo: &Path, commits: &mut [Commit]) -> ProviderResult<()> {
        let state = lock(&self.state);
        for commit in commits.iter_mut() {
            let files = state
                .files
                .get(&commit.revision)
                .cloned()
                .unwrap_or_else(|| vec![format!("src/{}.c", commit.revision)]);
            commit.set_details(CommitDetails {
                summary: format!("upstream change {}", commit.revision),
                author: "upstream-dev".to_string(),
                modified: files,
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn commit(&self, message: &str) -> ProviderResult<()> {
        let mut state = lock(&self.state);
        if let Some(needle) = &state.fail_commit_containing {
            if message.contains(needle.as_str()) {
                return Err(ProviderError::CommandFailed {
                    command: "git commit".to_string(),
                    code: 1,
                    stderr: "nothing to commit".to_string(),
                });
            }
        }
        state.commits.push(message.to_string());
        Ok(())
    }

    async fn diff_stat(&self) -> ProviderResult<String> {
        Ok(String::new())
    }

    async fn reset_working_tree(&self) -> ProviderResult<()> {
        lock(&self.state).resets += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vendoring tool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VendorState {
    latest: HashMap<String, (String, DateTime<Utc>)>,
    scripted: VecDeque<VendorOutcome>,
    vendored: Vec<(String, String)>,
    patches_applied: usize,
    fail_patches: bool,
}

/// Vendoring tool answering from a per-library "latest upstream" table.
#[derive(Debug, Default)]
pub struct FakeVendor {
    state: Mutex<VendorState>,
}

impl FakeVendor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest(&self, library: &str, revision: &str) {
        lock(&self.state)
            .latest
            .insert(library.to_string(), (revision.to_string(), Utc::now()));
    }

    /// Queue the outcome of the next `vendor` call; unscripted calls succeed.
    pub fn script(&self, result: VendorResult, message: &str) {
        lock(&self.state).scripted.push_back(VendorOutcome {
            result,
            message: message.to_string(),
        });
    }

    pub fn fail_patches(&self) {
        lock(&self.state).fail_patches = true;
    }

    /// `(library, revision)` for every vendor call.
    pub fn vendored(&self) -> Vec<(String, String)> {
        lock(&self.state).vendored.clone()
    }

    pub fn patches_applied(&self) -> usize {
        lock(&self.state).patches_applied
    }
}

#[async_trait]
impl VendorTool for FakeVendor {
    async fn check_for_update(
        &self,
        library: &Library,
        _branch: Option<&str>,
    ) -> ProviderResult<Option<(String, DateTime<Utc>)>> {
        let state = lock(&self.state);
        Ok(state
            .latest
            .get(&library.name)
            .filter(|(rev, _)| *rev != library.in_tree_revision)
            .cloned())
    }

    async fn vendor(&self, library: &Library, revision: &str) -> ProviderResult<VendorOutcome> {
        let mut state = lock(&self.state);
        state
            .vendored
            .push((library.name.clone(), revision.to_string()));
        Ok(state.scripted.pop_front().unwrap_or(VendorOutcome {
            result: VendorResult::Success,
            message: String::new(),
        }))
    }

    async fn apply_patches(&self, _library: &Library) -> ProviderResult<()> {
        let mut state = lock(&self.state);
        if state.fail_patches {
            return Err(fake_error("vendor", "patch does not apply"));
        }
        state.patches_applied += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bug tracker
// ---------------------------------------------------------------------------

/// A comment as the fake tracker stored it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeComment {
    pub text: String,
    pub needinfo: Option<String>,
    pub assignee: Option<String>,
}

/// A ticket as the fake tracker stored it.
#[derive(Debug, Clone)]
pub struct FakeTicket {
    pub filed: NewTicket,
    pub open: bool,
    pub resolution: Option<String>,
    pub duplicate_of: Option<TicketId>,
    pub comments: Vec<FakeComment>,
    pub affected_releases: Vec<String>,
}

#[derive(Debug, Default)]
struct BugState {
    next_id: TicketId,
    tickets: BTreeMap<TicketId, FakeTicket>,
    fail_close: bool,
}

#[derive(Debug, Default)]
pub struct FakeBugTracker {
    state: Mutex<BugState>,
}

impl FakeBugTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self, id: TicketId) -> Option<FakeTicket> {
        lock(&self.state).tickets.get(&id).cloned()
    }

    pub fn ticket_ids(&self) -> Vec<TicketId> {
        lock(&self.state).tickets.keys().copied().collect()
    }

    pub fn comments(&self, id: TicketId) -> Vec<FakeComment> {
        self.ticket(id).map(|t| t.comments).unwrap_or_default()
    }

    /// Make every later close request fail.
    pub fn fail_close(&self) {
        lock(&self.state).fail_close = true;
    }

    /// Close a ticket the way a human would.
    pub fn close(&self, id: TicketId) {
        if let Some(t) = lock(&self.state).tickets.get_mut(&id) {
            t.open = false;
            t.resolution = Some("FIXED".to_string());
        }
    }

    fn with_ticket<T>(
        &self,
        id: TicketId,
        f: impl FnOnce(&mut FakeTicket) -> T,
    ) -> ProviderResult<T> {
        let mut state = lock(&self.state);
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or_else(|| fake_error("bugzilla", &format!("no bug {id}")))?;
        Ok(f(ticket))
    }
}

#[async_trait]
impl BugTracker for FakeBugTracker {
    async fn file(&self, ticket: &NewTicket) -> ProviderResult<TicketId> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = 1000 + state.next_id;
        state.tickets.insert(
            id,
            FakeTicket {
                filed: ticket.clone(),
                open: true,
                resolution: None,
                duplicate_of: None,
                comments: Vec::new(),
                affected_releases: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn comment(
        &self,
        ticket: TicketId,
        text: &str,
        needinfo: Option<&str>,
        assignee: Option<&str>,
    ) -> ProviderResult<()> {
        self.with_ticket(ticket, |t| {
            t.comments.push(FakeComment {
                text: text.to_string(),
                needinfo: needinfo.map(str::to_string),
                assignee: assignee.map(str::to_string),
            })
        })
    }

    async fn close_as_wontfix(&self, ticket: TicketId, comment: &str) -> ProviderResult<()> {
        if lock(&self.state).fail_close {
            return Err(fake_error("bugzilla", "close rejected"));
        }
        self.with_ticket(ticket, |t| {
            t.open = false;
            t.resolution = Some("WONTFIX".to_string());
            t.comments.push(FakeComment {
                text: comment.to_string(),
                needinfo: None,
                assignee: None,
            });
        })
    }

    async fn close_as_duplicate(
        &self,
        ticket: TicketId,
        duplicate_of: TicketId,
        comment: &str,
    ) -> ProviderResult<()> {
        if lock(&self.state).fail_close {
            return Err(fake_error("bugzilla", "close rejected"));
        }
        self.with_ticket(ticket, |t| {
            t.open = false;
            t.resolution = Some("DUPLICATE".to_string());
            t.duplicate_of = Some(duplicate_of);
            t.comments.push(FakeComment {
                text: comment.to_string(),
                needinfo: None,
                assignee: None,
            });
        })
    }

    async fn find_open(&self, tickets: &[TicketId]) -> ProviderResult<Vec<TicketId>> {
        let state = lock(&self.state);
        Ok(tickets
            .iter()
            .copied()
            .filter(|id| state.tickets.get(id).is_some_and(|t| t.open))
            .collect())
    }

    async fn mark_release_affected(&self, ticket: TicketId, release: &str) -> ProviderResult<()> {
        self.with_ticket(ticket, |t| t.affected_releases.push(release.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Code review
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ReviewState {
    next_id: u32,
    submitted: Vec<(TicketId, Vec<String>)>,
    reviewers: Vec<(String, String)>,
    abandoned: Vec<String>,
    fail_submit: bool,
    fail_set_reviewer: bool,
    fail_abandon: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeCodeReview {
    state: Mutex<ReviewState>,
}

impl FakeCodeReview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submit(&self) {
        lock(&self.state).fail_submit = true;
    }

    pub fn fail_set_reviewer(&self) {
        lock(&self.state).fail_set_reviewer = true;
    }

    pub fn fail_abandon(&self, submission: &str) {
        lock(&self.state).fail_abandon.insert(submission.to_string());
    }

    pub fn submitted(&self) -> Vec<(TicketId, Vec<String>)> {
        lock(&self.state).submitted.clone()
    }

    pub fn reviewers(&self) -> Vec<(String, String)> {
        lock(&self.state).reviewers.clone()
    }

    pub fn abandoned(&self) -> Vec<String> {
        lock(&self.state).abandoned.clone()
    }
}

#[async_trait]
impl CodeReview for FakeCodeReview {
    async fn submit(&self, ticket: TicketId, has_patches: bool) -> ProviderResult<Vec<String>> {
        let mut state = lock(&self.state);
        if state.fail_submit {
            return Err(fake_error("phabricator", "submission rejected"));
        }
        let count = if has_patches { 2 } else { 1 };
        let mut ids = Vec::new();
        for _ in 0..count {
            state.next_id += 1;
            ids.push(format!("D{}", state.next_id));
        }
        state.submitted.push((ticket, ids.clone()));
        Ok(ids)
    }

    async fn set_reviewer(&self, submission: &str, reviewer: &str) -> ProviderResult<()> {
        let mut state = lock(&self.state);
        if state.fail_set_reviewer {
            return Err(fake_error("phabricator", "reviewer unknown"));
        }
        state
            .reviewers
            .push((submission.to_string(), reviewer.to_string()));
        Ok(())
    }

    async fn abandon(&self, submission: &str) -> ProviderResult<()> {
        let mut state = lock(&self.state);
        if state.fail_abandon.contains(submission) {
            return Err(fake_error("phabricator", "revision locked"));
        }
        state.abandoned.push(submission.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CI
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CiState {
    next_push: u32,
    submissions: Vec<(String, String, String)>,
    results: HashMap<String, Vec<CiJob>>,
    health: HashMap<String, PushHealth>,
    retriggers: Vec<RetriggerRequest>,
    classifications: FailureClassifications,
    fail_submit: bool,
}

/// CI answering from per-revision result tables.
#[derive(Debug)]
pub struct FakeCi {
    state: Mutex<CiState>,
}

impl Default for FakeCi {
    fn default() -> Self {
        let mut classifications = FailureClassifications::new();
        classifications.insert(NOT_CLASSIFIED, "not classified".to_string());
        classifications.insert(2, "fixed by commit".to_string());
        classifications.insert(4, "intermittent".to_string());
        Self {
            state: Mutex::new(CiState {
                classifications,
                ..Default::default()
            }),
        }
    }
}

impl FakeCi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_results(&self, revision: &str, jobs: Vec<CiJob>) {
        lock(&self.state)
            .results
            .insert(revision.to_string(), jobs);
    }

    /// Append jobs to a revision's results, as reruns do.
    pub fn add_results(&self, revision: &str, jobs: Vec<CiJob>) {
        lock(&self.state)
            .results
            .entry(revision.to_string())
            .or_default()
            .extend(jobs);
    }

    pub fn set_health(&self, revision: &str, health: PushHealth) {
        lock(&self.state)
            .health
            .insert(revision.to_string(), health);
    }

    pub fn fail_submit(&self) {
        lock(&self.state).fail_submit = true;
    }

    /// `(library, selector, try revision)` for every submission.
    pub fn submissions(&self) -> Vec<(String, String, String)> {
        lock(&self.state).submissions.clone()
    }

    pub fn retriggers(&self) -> Vec<RetriggerRequest> {
        lock(&self.state).retriggers.clone()
    }
}

#[async_trait]
impl CiProvider for FakeCi {
    async fn submit_to_ci(&self, library: &str, filter: &PlatformFilter) -> Result<String, CiError> {
        let mut state = lock(&self.state);
        if state.fail_submit {
            return Err(CiError::Submission("try server refused the push".to_string()));
        }
        state.next_push += 1;
        let revision = format!("try{}", state.next_push);
        state
            .submissions
            .push((library.to_string(), filter.selector(), revision.clone()));
        Ok(revision)
    }

    async fn get_job_results(&self, revision: &str) -> Result<Vec<CiJob>, CiError> {
        Ok(lock(&self.state)
            .results
            .get(revision)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_push_health(&self, revision: &str) -> Result<PushHealth, CiError> {
        Ok(lock(&self.state)
            .health
            .get(revision)
            .cloned()
            .unwrap_or_default())
    }

    async fn retrigger(&self, requests: &[RetriggerRequest]) -> Result<(), CiError> {
        lock(&self.state).retriggers.extend_from_slice(requests);
        Ok(())
    }

    async fn failure_classifications(&self) -> Result<FailureClassifications, CiError> {
        Ok(lock(&self.state).classifications.clone())
    }

    fn push_url(&self, revision: &str) -> String {
        format!("https://treeherder.test/jobs?repo=try&revision={revision}")
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// One of each fake, sharing ownership with the [`Providers`] built from it.
#[derive(Clone)]
pub struct FakeWorld {
    pub vcs: Arc<FakeVcs>,
    pub vendor: Arc<FakeVendor>,
    pub bugs: Arc<FakeBugTracker>,
    pub review: Arc<FakeCodeReview>,
    pub ci: Arc<FakeCi>,
    pub store: Arc<MemoryJobStore>,
}

impl FakeWorld {
    /// Upstream history is `revisions`, oldest first.
    pub fn new(revisions: &[&str]) -> Self {
        Self {
            vcs: Arc::new(FakeVcs::linear(revisions)),
            vendor: Arc::new(FakeVendor::new()),
            bugs: Arc::new(FakeBugTracker::new()),
            review: Arc::new(FakeCodeReview::new()),
            ci: Arc::new(FakeCi::new()),
            store: Arc::new(MemoryJobStore::new()),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            vcs: self.vcs.clone(),
            vendor: self.vendor.clone(),
            bugs: self.bugs.clone(),
            review: self.review.clone(),
            ci: self.ci.clone(),
            store: self.store.clone(),
        }
    }
}
