//! Error type shared by the remote adapters.

use thiserror::Error;
use vendorbot_ci::CiError;
use vendorbot_core::{ProviderError, Transient};

#[derive(Error, Debug)]
pub enum RemoteError {
    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}: {message}")]
    Http {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} unreachable: {message}")]
    Network {
        service: &'static str,
        message: String,
    },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    /// HTTP succeeded but the body carried an application-level error.
    #[error("{service} rejected the request: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    #[error("unexpected response from {service}: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("credential not configured: set {0}")]
    MissingCredential(&'static str),

    /// A command-line client failed.
    #[error(transparent)]
    Command(#[from] ProviderError),
}

impl RemoteError {
    pub(crate) fn transport(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout { service }
        } else {
            RemoteError::Network {
                service,
                message: err.to_string(),
            }
        }
    }

    pub(crate) fn decode(service: &'static str, message: impl Into<String>) -> Self {
        RemoteError::Decode {
            service,
            message: message.into(),
        }
    }
}

impl Transient for RemoteError {
    fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Network { .. } | RemoteError::Timeout { .. } => true,
            RemoteError::Command(e) => e.is_transient(),
            RemoteError::Api { .. } | RemoteError::Decode { .. } | RemoteError::MissingCredential(_) => {
                false
            }
        }
    }
}

impl From<RemoteError> for ProviderError {
    fn from(err: RemoteError) -> Self {
        let text = err.to_string();
        match err {
            RemoteError::Http {
                service,
                status,
                message,
            } => ProviderError::Http {
                service: service.to_string(),
                status,
                message,
            },
            RemoteError::Network { service, message } => ProviderError::Network {
                service: service.to_string(),
                message,
            },
            RemoteError::Timeout { service } => ProviderError::Network {
                service: service.to_string(),
                message: "request timed out".to_string(),
            },
            RemoteError::Command(e) => e,
            RemoteError::Api { service, .. } | RemoteError::Decode { service, .. } => {
                ProviderError::protocol(service, text)
            }
            RemoteError::MissingCredential(_) => ProviderError::protocol("configuration", text),
        }
    }
}

impl From<RemoteError> for CiError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Http {
                status, message, ..
            } => CiError::Http { status, message },
            RemoteError::Network { message, .. } => CiError::Network(message),
            RemoteError::Timeout { .. } => CiError::Network("request timed out".to_string()),
            RemoteError::Command(ProviderError::Timeout { secs, .. }) => CiError::Timeout { secs },
            RemoteError::Command(e) => CiError::Submission(e.to_string()),
            other => CiError::Decode(other.to_string()),
        }
    }
}
