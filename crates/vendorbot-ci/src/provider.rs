//! The CI dispatch/query seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classifier::RetriggerRequest;
use crate::error::CiError;
use crate::result::{CiJob, FailureClassifications, PushHealth};

/// Which platforms a try push should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "platform", rename_all = "snake_case")]
pub enum PlatformFilter {
    /// Only the given platform (the first, cheap try run).
    Only(String),
    /// Every platform except the given one (the follow-up try run).
    AllExcept(String),
}

impl PlatformFilter {
    /// Selector passed to the try syntax, e.g. `linux64` or `-linux64`.
    pub fn selector(&self) -> String {
        match self {
            PlatformFilter::Only(p) => p.clone(),
            PlatformFilter::AllExcept(p) => format!("-{p}"),
        }
    }
}

/// Submits try pushes and reads their results.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Push the current monorepo state to try and return the push revision.
    async fn submit_to_ci(&self, library: &str, filter: &PlatformFilter) -> Result<String, CiError>;

    /// Every job of a push. An empty list means nothing has been reported yet.
    async fn get_job_results(&self, revision: &str) -> Result<Vec<CiJob>, CiError>;

    async fn get_push_health(&self, revision: &str) -> Result<PushHealth, CiError>;

    async fn retrigger(&self, requests: &[RetriggerRequest]) -> Result<(), CiError>;

    async fn failure_classifications(&self) -> Result<FailureClassifications, CiError>;

    /// Browser link for a push, used in ticket comments.
    fn push_url(&self, revision: &str) -> String;
}
