//! vendorbot-ci - interpreting try pushes
//!
//! Provides:
//! - the per-run CI job model and push-health triage
//! - the completion gate (wait / build failed / ready)
//! - failure classification into buckets and retrigger decisions
//! - the `CiProvider` trait the task runners talk to

pub mod classifier;
pub mod error;
pub mod gate;
pub mod provider;
pub mod result;

// Re-export key types
pub use classifier::{Classification, FailureGroup, RetriggerRequest, TOTAL_ATTEMPTS};
pub use error::CiError;
pub use gate::{CiGate, GateVerdict};
pub use provider::{CiProvider, PlatformFilter};
pub use result::{
    combine_results, CiJob, CiJobResult, CiJobState, FailureClassifications, HealthFailure,
    PushHealth, NOT_CLASSIFIED,
};
