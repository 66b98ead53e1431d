//! HTTP plumbing shared by the REST clients.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::RemoteError;

/// Default client-level timeout for one HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest error body kept in an error message.
const ERROR_BODY_LIMIT: usize = 500;

pub(crate) fn build_client(service: &'static str, timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .user_agent(concat!("vendorbot/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::transport(service, e))
}

/// Read the body, failing on a non-success status.
pub(crate) async fn read_body(service: &'static str, response: Response) -> Result<String, RemoteError> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| RemoteError::transport(service, e))?;
    debug!(service, %url, status = status.as_u16(), bytes = body.len(), "response");

    if !status.is_success() {
        let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(RemoteError::Http {
            service,
            status: status.as_u16(),
            message,
        });
    }
    Ok(body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(service: &'static str, body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::decode(service, e.to_string()))
}

/// Check the status and decode the JSON body.
pub(crate) async fn decode<T: DeserializeOwned>(
    service: &'static str,
    response: Response,
) -> Result<T, RemoteError> {
    let body = read_body(service, response).await?;
    parse_json(service, &body)
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
