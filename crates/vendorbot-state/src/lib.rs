//! vendorbot-state: job persistence for vendorbot
//!
//! Holds the persisted [`Job`] entity, the [`JobStore`] trait the task
//! runners are written against, an in-memory fake, and a SurrealDB-backed
//! store.
//!
//! ## Key Components
//!
//! - `Job`, `JobStatus`, `JobOutcome`: the state machine's durable record
//! - `JobStore`: async CRUD keyed by id and by (library, task type, version)
//! - `SurrealJobStore`: `mem://`, `surrealkv://` or remote SurrealDB
//! - `fakes::MemoryJobStore`: dependency-free store for tests

mod error;
pub mod fakes;
pub mod job;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use job::{
    Job, JobId, JobOutcome, JobStatus, JobType, NewJob, ReviewPurpose, ReviewSubmission,
    TicketId, TryRun, TryRunPurpose,
};
pub use storage_traits::{JobStore, StorageResult};
pub use surreal_store::SurrealJobStore;

/// Result type for vendorbot-state operations
pub type Result<T> = std::result::Result<T, StateError>;
