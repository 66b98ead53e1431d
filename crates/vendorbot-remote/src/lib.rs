//! vendorbot-remote - adapters for the hosted services
//!
//! Provides:
//! - `BugzillaClient`: Bugzilla REST API as a `BugTracker`
//! - `PhabricatorClient`: `moz-phab` submission plus Conduit edits as a `CodeReview`
//! - `TreeherderClient`: try pushes, Treeherder results and Taskcluster reruns as a `CiProvider`
//!
//! Credentials are read from the environment, never from configuration files.

pub mod bugzilla;
pub mod error;
mod http;
pub mod phabricator;
pub mod treeherder;

// Re-export key types
pub use bugzilla::{BugzillaClient, BugzillaConfig};
pub use error::RemoteError;
pub use http::DEFAULT_HTTP_TIMEOUT;
pub use phabricator::{PhabricatorClient, PhabricatorConfig};
pub use treeherder::{TreeherderClient, TreeherderConfig};
