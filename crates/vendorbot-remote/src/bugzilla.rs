//! [`BugTracker`] adapter for the Bugzilla REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;
use vendorbot_core::{BugTracker, NewTicket, ProviderResult};
use vendorbot_state::TicketId;

use crate::error::RemoteError;
use crate::http::{self, DEFAULT_HTTP_TIMEOUT};

const SERVICE: &str = "bugzilla";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "BUGZILLA_API_KEY";

/// Per-release tracking flag; the release number is appended.
const RELEASE_STATUS_FIELD: &str = "cf_status_firefox";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugzillaConfig {
    /// REST root, e.g. `https://bugzilla.mozilla.org/rest`.
    pub url: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT.as_secs()
}

impl BugzillaConfig {
    /// Read the API key from the environment.
    pub fn from_env(url: impl Into<String>) -> Result<Self, RemoteError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(RemoteError::MissingCredential(API_KEY_ENV))?;
        Ok(Self {
            url: url.into(),
            api_key,
            timeout_secs: default_timeout_secs(),
        })
    }
}

#[derive(Debug, Serialize)]
struct NeedinfoFlag<'a> {
    name: &'static str,
    status: &'static str,
    requestee: &'a str,
}

impl<'a> NeedinfoFlag<'a> {
    fn new(requestee: &'a str) -> Self {
        Self {
            name: "needinfo",
            status: "?",
            requestee,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateBug<'a> {
    product: &'a str,
    component: &'a str,
    summary: &'a str,
    description: &'a str,
    version: &'static str,
    #[serde(rename = "type")]
    bug_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<TicketId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    blocks: Vec<TicketId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    flags: Vec<NeedinfoFlag<'a>>,
}

impl<'a> From<&'a NewTicket> for CreateBug<'a> {
    fn from(t: &'a NewTicket) -> Self {
        Self {
            product: &t.product,
            component: &t.component,
            summary: &t.summary,
            description: &t.description,
            version: "unspecified",
            bug_type: "enhancement",
            cc: t.cc.iter().map(String::as_str).collect(),
            depends_on: t.depends_on.into_iter().collect(),
            blocks: t.blocks.into_iter().collect(),
            flags: t.needinfo.iter().map(|n| NeedinfoFlag::new(n)).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: TicketId,
}

#[derive(Debug, Deserialize)]
struct BugList {
    #[serde(default)]
    bugs: Vec<BugState>,
}

#[derive(Debug, Deserialize)]
struct BugState {
    id: TicketId,
    is_open: bool,
}

/// Field changes for `PUT /bug/{id}`, or `None` when there is nothing to change.
fn follow_up_update(needinfo: Option<&str>, assignee: Option<&str>) -> Option<Value> {
    let mut body = Map::new();
    if let Some(requestee) = needinfo {
        body.insert("flags".into(), json!([NeedinfoFlag::new(requestee)]));
    }
    if let Some(assignee) = assignee {
        body.insert("assigned_to".into(), json!(assignee));
    }
    (!body.is_empty()).then_some(Value::Object(body))
}

fn resolve(resolution: &str, comment: &str, dupe_of: Option<TicketId>) -> Value {
    let mut body = json!({
        "status": "RESOLVED",
        "resolution": resolution,
        "comment": { "body": comment },
    });
    if let (Some(dupe), Some(map)) = (dupe_of, body.as_object_mut()) {
        map.insert("dupe_of".into(), json!(dupe));
    }
    body
}

fn release_status(release: &str) -> Value {
    let mut body = Map::new();
    body.insert(format!("{RELEASE_STATUS_FIELD}{release}"), json!("affected"));
    Value::Object(body)
}

pub struct BugzillaClient {
    config: BugzillaConfig,
    http: reqwest::Client,
}

impl BugzillaClient {
    pub fn new(config: BugzillaConfig) -> Result<Self, RemoteError> {
        let http = http::build_client(SERVICE, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        http::join(&self.config.url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-BUGZILLA-API-KEY", &self.config.api_key)
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<String, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::transport(SERVICE, e))?;
        http::read_body(SERVICE, response).await
    }

    async fn update(&self, ticket: TicketId, body: &Value) -> Result<(), RemoteError> {
        self.send(self.request(reqwest::Method::PUT, &format!("bug/{ticket}")).json(body))
            .await?;
        Ok(())
    }

    async fn create(&self, ticket: &NewTicket) -> Result<TicketId, RemoteError> {
        let body = CreateBug::from(ticket);
        let text = self
            .send(self.request(reqwest::Method::POST, "bug").json(&body))
            .await?;
        let created: Created = http::parse_json(SERVICE, &text)?;
        Ok(created.id)
    }

    async fn open_subset(&self, tickets: &[TicketId]) -> Result<Vec<TicketId>, RemoteError> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }
        let ids = tickets
            .iter()
            .map(TicketId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let text = self
            .send(
                self.request(reqwest::Method::GET, "bug")
                    .query(&[("id", ids.as_str()), ("include_fields", "id,is_open")]),
            )
            .await?;
        let list: BugList = http::parse_json(SERVICE, &text)?;
        Ok(list
            .bugs
            .into_iter()
            .filter(|b| b.is_open)
            .map(|b| b.id)
            .collect())
    }
}

#[async_trait]
impl BugTracker for BugzillaClient {
    async fn file(&self, ticket: &NewTicket) -> ProviderResult<TicketId> {
        let id = self.create(ticket).await?;
        info!(ticket = id, summary = %ticket.summary, "bug filed");
        Ok(id)
    }

    async fn comment(
        &self,
        ticket: TicketId,
        text: &str,
        needinfo: Option<&str>,
        assignee: Option<&str>,
    ) -> ProviderResult<()> {
        let body = json!({ "comment": text });
        self.send(
            self.request(reqwest::Method::POST, &format!("bug/{ticket}/comment"))
                .json(&body),
        )
        .await?;
        if let Some(update) = follow_up_update(needinfo, assignee) {
            self.update(ticket, &update).await?;
        }
        Ok(())
    }

    async fn close_as_wontfix(&self, ticket: TicketId, comment: &str) -> ProviderResult<()> {
        self.update(ticket, &resolve("WONTFIX", comment, None)).await?;
        Ok(())
    }

    async fn close_as_duplicate(
        &self,
        ticket: TicketId,
        duplicate_of: TicketId,
        comment: &str,
    ) -> ProviderResult<()> {
        self.update(ticket, &resolve("DUPLICATE", comment, Some(duplicate_of)))
            .await?;
        Ok(())
    }

    async fn find_open(&self, tickets: &[TicketId]) -> ProviderResult<Vec<TicketId>> {
        Ok(self.open_subset(tickets).await?)
    }

    async fn mark_release_affected(&self, ticket: TicketId, release: &str) -> ProviderResult<()> {
        self.update(ticket, &release_status(release)).await?;
        Ok(())
    }
}
