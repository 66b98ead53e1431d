//! Domain types: libraries, tasks, commits and the error taxonomy.

pub mod commit;
pub mod error;
pub mod library;

pub use commit::{short_revision, Commit, CommitDetails, UpstreamHost};
pub use error::{ProviderError, Result, VendorbotError};
pub use library::{CommitFilter, Frequency, Library, Task, DEFAULT_INITIAL_PLATFORM};
