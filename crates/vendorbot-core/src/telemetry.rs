//! Tracing initialisation for the vendorbot binary.
//!
//! vendorbot keeps two output streams apart. Everything the `tracing` macros
//! emit (job transitions, retries, tolerated side-effect failures) goes to
//! stderr. Stdout carries only the command's result: the run report, the job
//! list or the check output, as text or as JSON with `--json`. Piping
//! `vendorbot --json jobs` into a JSON tool therefore never sees log lines,
//! and the log stream itself is JSON lines under `--json` too.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored since
//! the global subscriber can only be set once per process.

use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`. With `json`, every event is
/// written as one JSON object per line; otherwise as human-readable text.
/// Stdout is left untouched for command output.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing::dispatcher::set_global_default(dispatch(json, env_filter, std::io::stderr)).ok();
}

fn dispatch<W>(json: bool, filter: EnvFilter, writer: W) -> Dispatch
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        Dispatch::new(registry.with(fmt::layer().with_target(false).json().with_writer(writer)))
    } else {
        Dispatch::new(registry.with(fmt::layer().with_target(false).with_writer(writer)))
    }
}
