//! [`CiProvider`] adapter.
//!
//! Pushes go through `./mach try` in the monorepo, results and push health
//! come from the Treeherder REST API, and retriggers rerun tasks through the
//! Taskcluster command-line client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use vendorbot_ci::{
    CiError, CiJob, CiJobResult, CiJobState, CiProvider, FailureClassifications, HealthFailure,
    PlatformFilter, PushHealth, RetriggerRequest, NOT_CLASSIFIED,
};
use vendorbot_core::{run_checked, DEFAULT_COMMAND_TIMEOUT};

use crate::error::RemoteError;
use crate::http::{self, DEFAULT_HTTP_TIMEOUT};

const SERVICE: &str = "treeherder";

/// Environment variable naming the Taskcluster deployment.
pub const TASKCLUSTER_ROOT_URL_ENV: &str = "TASKCLUSTER_ROOT_URL";

/// Jobs fetched per page.
const PAGE_SIZE: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeherderConfig {
    /// e.g. `https://treeherder.mozilla.org`.
    pub url: String,
    /// Treeherder project of the try server.
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(skip)]
    pub taskcluster_root_url: String,
    #[serde(default = "default_mach")]
    pub mach: String,
    #[serde(default = "default_taskcluster")]
    pub taskcluster: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_repo() -> String {
    "try".to_string()
}

fn default_mach() -> String {
    "./mach".to_string()
}

fn default_taskcluster() -> String {
    "taskcluster".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT.as_secs()
}

impl TreeherderConfig {
    /// Read the Taskcluster root URL from the environment.
    pub fn from_env(url: impl Into<String>) -> Result<Self, RemoteError> {
        let root = std::env::var(TASKCLUSTER_ROOT_URL_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .ok_or(RemoteError::MissingCredential(TASKCLUSTER_ROOT_URL_ENV))?;
        Ok(Self {
            url: url.into(),
            repo: default_repo(),
            taskcluster_root_url: root,
            mach: default_mach(),
            taskcluster: default_taskcluster(),
            timeout_secs: default_timeout_secs(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PushList {
    #[serde(default)]
    results: Vec<PushRef>,
}

#[derive(Debug, Deserialize)]
struct PushRef {
    id: u64,
}

/// `/api/jobs/` answers with rows of values plus the property names once.
#[derive(Debug, Deserialize)]
struct JobPage {
    #[serde(default)]
    results: Vec<Vec<Value>>,
    #[serde(default)]
    job_property_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClassificationName {
    id: u32,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    metrics: HealthMetrics,
}

#[derive(Debug, Default, Deserialize)]
struct HealthMetrics {
    #[serde(default)]
    tests: HealthTests,
}

#[derive(Debug, Default, Deserialize)]
struct HealthTests {
    #[serde(default)]
    details: HealthDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthDetails {
    #[serde(default)]
    need_investigation: Vec<HealthTest>,
    #[serde(default)]
    known_issues: Vec<HealthTest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthTest {
    test_name: String,
    #[serde(default)]
    job_name: String,
    #[serde(default)]
    fail_jobs: Vec<HealthJob>,
    #[serde(default)]
    pass_jobs: Vec<HealthJob>,
    #[serde(default)]
    pass_in_failed_jobs: Vec<HealthJob>,
}

#[derive(Debug, Deserialize)]
struct HealthJob {
    task_id: String,
    #[serde(default)]
    job_type_name: Option<String>,
}

impl From<HealthTest> for HealthFailure {
    fn from(t: HealthTest) -> Self {
        let job_type_name = t
            .fail_jobs
            .iter()
            .find_map(|j| j.job_type_name.clone())
            .unwrap_or(t.job_name);
        let total = t.fail_jobs.len() + t.pass_jobs.len() + t.pass_in_failed_jobs.len();
        HealthFailure {
            test_name: t.test_name,
            job_type_name,
            failed_task_ids: t.fail_jobs.into_iter().map(|j| j.task_id).collect(),
            total_runs: total as u32,
        }
    }
}

fn parse_state(s: &str) -> CiJobState {
    match s {
        "pending" => CiJobState::Pending,
        "running" => CiJobState::Running,
        "completed" => CiJobState::Completed,
        "failed" => CiJobState::Failed,
        "exception" => CiJobState::Exception,
        "busted" => CiJobState::Busted,
        // Anything else is a terminal state this client does not name.
        _ => CiJobState::Completed,
    }
}

fn parse_result(s: &str) -> CiJobResult {
    match s {
        "success" => CiJobResult::Success,
        "retry" => CiJobResult::Retry,
        "testfailed" => CiJobResult::TestFailed,
        "busted" => CiJobResult::Busted,
        "exception" => CiJobResult::Exception,
        "usercancel" => CiJobResult::UserCancel,
        _ => CiJobResult::Unknown,
    }
}

/// Turn one page of compact rows into jobs.
fn decode_jobs(page: JobPage) -> Result<Vec<CiJob>, RemoteError> {
    let index: HashMap<&str, usize> = page
        .job_property_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let column = |name: &'static str| {
        index
            .get(name)
            .copied()
            .ok_or_else(|| RemoteError::decode(SERVICE, format!("jobs response lacks `{name}`")))
    };
    let (job_type, task, retry, state, result, classification) = (
        column("job_type_name")?,
        column("task_id")?,
        column("retry_id")?,
        column("state")?,
        column("result")?,
        column("failure_classification_id")?,
    );

    let text = |row: &[Value], i: usize| row.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
    let number = |row: &[Value], i: usize| row.get(i).and_then(Value::as_u64);

    Ok(page
        .results
        .iter()
        .map(|row| {
            let row = row.as_slice();
            CiJob {
                job_type_name: text(row, job_type),
                task_id: text(row, task),
                run_id: number(row, retry).unwrap_or(0) as u32,
                state: parse_state(&text(row, state)),
                result: parse_result(&text(row, result)),
                failure_classification_id: number(row, classification)
                    .map_or(NOT_CLASSIFIED, |id| id as u32),
            }
        })
        .collect())
}

/// Fuzzy query selecting (or excluding) a platform.
fn fuzzy_query(filter: &PlatformFilter) -> String {
    match filter {
        PlatformFilter::Only(platform) => format!("'{platform}"),
        PlatformFilter::AllExcept(platform) => format!("!{platform}"),
    }
}

/// Try revision from `./mach try` output.
fn parse_push_revision(output: &str) -> Option<String> {
    let pattern = Regex::new(r"(?:revision=|/rev/)([0-9a-f]{12,40})").ok()?;
    pattern
        .captures_iter(output)
        .last()
        .map(|cap| cap[1].to_string())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TreeherderClient {
    config: TreeherderConfig,
    monorepo: PathBuf,
    command_timeout: Duration,
    http: reqwest::Client,
}

impl TreeherderClient {
    pub fn new(config: TreeherderConfig, monorepo: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let http = http::build_client(SERVICE, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            monorepo: monorepo.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            http,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(http::join(&self.config.url, path))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| RemoteError::transport(SERVICE, e))?;
        http::decode(SERVICE, response).await
    }

    async fn push_id(&self, revision: &str) -> Result<Option<u64>, RemoteError> {
        let path = format!("api/project/{}/push/", self.config.repo);
        let pushes: PushList = self.get(&path, &[("revision", revision.to_string())]).await?;
        Ok(pushes.results.first().map(|p| p.id))
    }

    async fn jobs(&self, revision: &str) -> Result<Vec<CiJob>, RemoteError> {
        let Some(push_id) = self.push_id(revision).await? else {
            debug!(revision, "push not known to treeherder yet");
            return Ok(Vec::new());
        };
        let mut jobs = Vec::new();
        let mut offset = 0;
        loop {
            let page: JobPage = self
                .get(
                    "api/jobs/",
                    &[
                        ("push_id", push_id.to_string()),
                        ("count", PAGE_SIZE.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;
            let rows = page.results.len();
            jobs.extend(decode_jobs(page)?);
            if rows < PAGE_SIZE {
                break;
            }
            offset += rows;
        }
        debug!(revision, push_id, jobs = jobs.len(), "job results fetched");
        Ok(jobs)
    }

    async fn health(&self, revision: &str) -> Result<PushHealth, RemoteError> {
        let path = format!("api/project/{}/push/health/", self.config.repo);
        let response: HealthResponse = self.get(&path, &[("revision", revision.to_string())]).await?;
        let details = response.metrics.tests.details;
        Ok(PushHealth {
            known_issues: details.known_issues.into_iter().map(HealthFailure::from).collect(),
            need_investigation: details
                .need_investigation
                .into_iter()
                .map(HealthFailure::from)
                .collect(),
        })
    }
}

#[async_trait]
impl CiProvider for TreeherderClient {
    async fn submit_to_ci(&self, library: &str, filter: &PlatformFilter) -> Result<String, CiError> {
        let query = fuzzy_query(filter);
        let message = format!("Try run for {library} update ({})", filter.selector());
        let out = run_checked(
            &self.config.mach,
            &["try", "fuzzy", "--full", "--query", &query, "--message", &message],
            &self.monorepo,
            self.command_timeout,
        )
        .await
        .map_err(RemoteError::from)?;
        let revision = parse_push_revision(&out).ok_or_else(|| {
            CiError::Submission("could not find the try revision in `mach try` output".to_string())
        })?;
        info!(library, selector = %filter.selector(), revision, "pushed to try");
        Ok(revision)
    }

    async fn get_job_results(&self, revision: &str) -> Result<Vec<CiJob>, CiError> {
        Ok(self.jobs(revision).await?)
    }

    async fn get_push_health(&self, revision: &str) -> Result<PushHealth, CiError> {
        Ok(self.health(revision).await?)
    }

    async fn retrigger(&self, requests: &[RetriggerRequest]) -> Result<(), CiError> {
        for request in requests {
            for _ in 0..request.times {
                run_checked(
                    &self.config.taskcluster,
                    &["task", "rerun", &request.task_id],
                    &self.monorepo,
                    self.command_timeout,
                )
                .await
                .map_err(RemoteError::from)?;
            }
            info!(
                job_type = %request.job_type_name,
                times = request.times,
                task = %http::join(&self.config.taskcluster_root_url, &format!("tasks/{}", request.task_id)),
                "task rerun requested"
            );
        }
        Ok(())
    }

    async fn failure_classifications(&self) -> Result<FailureClassifications, CiError> {
        let names: Vec<ClassificationName> = self.get("api/failureclassification/", &[]).await?;
        Ok(names.into_iter().map(|c| (c.id, c.name)).collect())
    }

    fn push_url(&self, revision: &str) -> String {
        format!(
            "{}/jobs?repo={}&revision={revision}",
            self.config.url.trim_end_matches('/'),
            self.config.repo
        )
    }
}
