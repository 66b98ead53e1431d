//! vendorbot-core - job lifecycle orchestration
//!
//! Provides:
//! - the library/task/commit domain model and error taxonomy
//! - the commit diff engine (new and unseen upstream commits)
//! - the frequency gate and the two task runners (vendoring, commit alert)
//! - the run driver with per-library isolation
//! - collaborator traits with git and `./mach vendor` adapters
//! - scripted fakes for every collaborator

pub mod checkout;
pub mod comments;
pub mod commit_diff;
pub mod domain;
pub mod driver;
pub mod fakes;
pub mod frequency;
pub mod git;
pub mod obs;
pub mod process;
pub mod providers;
pub mod retry;
pub mod runner;
pub mod telemetry;
pub mod update_cache;
pub mod vendor;

// Re-export key types
pub use checkout::ScratchCheckout;
pub use commit_diff::{check_for_update, UpdateCheck};
pub use domain::{
    short_revision, Commit, CommitDetails, CommitFilter, Frequency, Library, ProviderError,
    Result, Task, UpstreamHost, VendorbotError, DEFAULT_INITIAL_PLATFORM,
};
pub use driver::{Driver, LibraryFailure, RunReport, RunSettings, TaskCheck};
pub use frequency::{should_process, GateInput};
pub use git::GitVersionControl;
pub use process::{run_checked, run_command, CommandOutput, DEFAULT_COMMAND_TIMEOUT};
pub use providers::{
    BugTracker, CodeReview, CommitQuery, NewTicket, ProviderResult, Providers, VendorOutcome,
    VendorResult, VendorTool, VersionControl,
};
pub use retry::{with_retry, RetryPolicy, Transient};
pub use update_cache::{Candidate, UpdateCache};
pub use vendor::CommandVendorTool;
