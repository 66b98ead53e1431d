//! [`CodeReview`] adapter: `moz-phab` for submission, Conduit for edits.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use vendorbot_core::{run_checked, CodeReview, ProviderResult, DEFAULT_COMMAND_TIMEOUT};
use vendorbot_state::TicketId;

use crate::error::RemoteError;
use crate::http::{self, DEFAULT_HTTP_TIMEOUT};

const SERVICE: &str = "phabricator";

/// Environment variable holding the Conduit API token.
pub const TOKEN_ENV: &str = "PHABRICATOR_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhabricatorConfig {
    /// Instance root, e.g. `https://phabricator.services.mozilla.com`.
    pub url: String,
    #[serde(skip)]
    pub token: String,
    /// Submission client, run in the monorepo.
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_program() -> String {
    "moz-phab".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT.as_secs()
}

impl PhabricatorConfig {
    /// Read the Conduit token from the environment.
    pub fn from_env(url: impl Into<String>) -> Result<Self, RemoteError> {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or(RemoteError::MissingCredential(TOKEN_ENV))?;
        Ok(Self {
            url: url.into(),
            token,
            program: default_program(),
            timeout_secs: default_timeout_secs(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConduitResponse<T> {
    result: Option<T>,
    error_code: Option<String>,
    error_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    phid: String,
}

/// Revision ids in the order `moz-phab` printed them.
fn parse_submitted(output: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let Ok(pattern) = Regex::new(r"/(D\d+)\b") else {
        return ids;
    };
    for cap in pattern.captures_iter(output) {
        let id = cap[1].to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn unwrap_conduit<T>(method: &str, response: ConduitResponse<T>) -> Result<T, RemoteError> {
    if let Some(code) = response.error_code {
        return Err(RemoteError::Api {
            service: SERVICE,
            message: format!(
                "{method}: {code}: {}",
                response.error_info.unwrap_or_default()
            ),
        });
    }
    response
        .result
        .ok_or_else(|| RemoteError::decode(SERVICE, format!("{method} returned no result")))
}

pub struct PhabricatorClient {
    config: PhabricatorConfig,
    monorepo: PathBuf,
    command_timeout: Duration,
    http: reqwest::Client,
}

impl PhabricatorClient {
    pub fn new(config: PhabricatorConfig, monorepo: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let http = http::build_client(SERVICE, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            monorepo: monorepo.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            http,
        })
    }

    async fn conduit<T: DeserializeOwned>(&self, method: &str, mut params: Value) -> Result<T, RemoteError> {
        if let Some(map) = params.as_object_mut() {
            map.insert("__conduit__".into(), json!({ "token": self.config.token }));
        }
        let url = http::join(&self.config.url, &format!("api/{method}"));
        let form = [
            ("params", params.to_string()),
            ("output", "json".to_string()),
            ("__conduit__", "1".to_string()),
        ];
        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RemoteError::transport(SERVICE, e))?;
        let decoded: ConduitResponse<T> = http::decode(SERVICE, response).await?;
        unwrap_conduit(method, decoded)
    }

    /// PHID of a user, or of a project when the name starts with `#`.
    async fn reviewer_phid(&self, reviewer: &str) -> Result<String, RemoteError> {
        let (method, params) = match reviewer.strip_prefix('#') {
            Some(slug) => ("project.search", json!({ "constraints": { "slugs": [slug] } })),
            None => ("user.search", json!({ "constraints": { "usernames": [reviewer] } })),
        };
        let found: SearchResult = self.conduit(method, params).await?;
        found
            .data
            .into_iter()
            .next()
            .map(|hit| hit.phid)
            .ok_or_else(|| RemoteError::Api {
                service: SERVICE,
                message: format!("no user or project named {reviewer}"),
            })
    }

    async fn edit(&self, submission: &str, transactions: Value) -> Result<(), RemoteError> {
        let params = json!({
            "objectIdentifier": submission,
            "transactions": transactions,
        });
        let _: Value = self.conduit("differential.revision.edit", params).await?;
        Ok(())
    }
}

#[async_trait]
impl CodeReview for PhabricatorClient {
    async fn submit(&self, ticket: TicketId, has_patches: bool) -> ProviderResult<Vec<String>> {
        let count = if has_patches { 2 } else { 1 };
        let bug = ticket.to_string();
        let start = format!("HEAD~{}", count - 1);
        let out = run_checked(
            &self.config.program,
            &["submit", "--yes", "--no-wip", "--bug", &bug, &start],
            &self.monorepo,
            self.command_timeout,
        )
        .await?;

        let ids = parse_submitted(&out);
        if ids.len() != count {
            return Err(RemoteError::decode(
                SERVICE,
                format!("expected {count} revisions from {}, found {ids:?}", self.config.program),
            )
            .into());
        }
        info!(ticket, revisions = ?ids, "submitted for review");
        Ok(ids)
    }

    async fn set_reviewer(&self, submission: &str, reviewer: &str) -> ProviderResult<()> {
        let phid = self.reviewer_phid(reviewer).await?;
        self.edit(submission, json!([{ "type": "reviewers.set", "value": [phid] }]))
            .await?;
        info!(submission, reviewer, "reviewer set");
        Ok(())
    }

    async fn abandon(&self, submission: &str) -> ProviderResult<()> {
        self.edit(submission, json!([{ "type": "abandon", "value": true }]))
            .await?;
        info!(submission, "revision abandoned");
        Ok(())
    }
}
