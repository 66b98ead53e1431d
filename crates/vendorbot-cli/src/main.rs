//! vendorbot - keeps vendored third-party libraries in sync with upstream
//!
//! Meant to be invoked periodically; every invocation resumes the jobs the
//! previous one left in flight.
//!
//! ## Commands
//!
//! - `run`: process every configured library (or one)
//! - `jobs`: list persisted jobs
//! - `check`: show new and unseen upstream commits without changing anything
//! - `delete-job`: remove one persisted job

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use vendorbot_core::telemetry::init_tracing;
use vendorbot_core::{
    short_revision, CommandVendorTool, Driver, GitVersionControl, Providers, RunReport,
    RunSettings, TaskCheck,
};
use vendorbot_remote::bugzilla::API_KEY_ENV;
use vendorbot_remote::phabricator::TOKEN_ENV;
use vendorbot_remote::treeherder::TASKCLUSTER_ROOT_URL_ENV;
use vendorbot_remote::{BugzillaClient, PhabricatorClient, TreeherderClient};
use vendorbot_state::{Job, JobId, JobStore, SurrealJobStore};

use crate::config::{Config, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "vendorbot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keeps vendored third-party libraries in sync with upstream", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every configured library, or only the named one
    Run {
        #[arg(short, long)]
        library: Option<String>,
    },

    /// List persisted jobs
    Jobs {
        #[arg(short, long)]
        library: Option<String>,
    },

    /// Show new and unseen upstream commits for a library
    Check {
        #[arg(short, long)]
        library: String,
    },

    /// Remove one persisted job
    DeleteJob {
        #[arg(long)]
        id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = Config::load(&cli.config)?;
    let store = open_store(&config).await?;

    match cli.command {
        Commands::Run { library } => cmd_run(&config, store, library.as_deref(), cli.json).await,
        Commands::Jobs { library } => cmd_jobs(store.as_ref(), library.as_deref(), cli.json).await,
        Commands::Check { library } => cmd_check(&config, store, &library, cli.json).await,
        Commands::DeleteJob { id } => cmd_delete_job(store.as_ref(), id).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    let store = match &config.database {
        Some(url) => SurrealJobStore::connect(url)
            .await
            .with_context(|| format!("Failed to connect to job database {url}"))?,
        None => SurrealJobStore::from_env()
            .await
            .context("Failed to connect to job database")?,
    };
    Ok(Arc::new(store))
}

fn credential(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{name} must be set"))
}

/// Fill in the secrets the config file never carries.
fn load_credentials(config: &mut Config) -> Result<()> {
    config.bugzilla.api_key = credential(API_KEY_ENV)?;
    config.phabricator.token = credential(TOKEN_ENV)?;
    config.treeherder.taskcluster_root_url = credential(TASKCLUSTER_ROOT_URL_ENV)?;
    Ok(())
}

fn build_providers(config: &Config, store: Arc<dyn JobStore>) -> Result<Providers> {
    let monorepo: &Path = &config.monorepo;

    let mut vcs = GitVersionControl::new(monorepo);
    if let Some(base_ref) = &config.base_ref {
        vcs = vcs.with_base_ref(base_ref.clone());
    }
    let bugs = BugzillaClient::new(config.bugzilla.clone()).context("Failed to set up Bugzilla")?;
    let review = PhabricatorClient::new(config.phabricator.clone(), monorepo)
        .context("Failed to set up Phabricator")?;
    let ci = TreeherderClient::new(config.treeherder.clone(), monorepo)
        .context("Failed to set up Treeherder")?;

    Ok(Providers {
        vcs: Arc::new(vcs),
        vendor: Arc::new(CommandVendorTool::new(monorepo)),
        bugs: Arc::new(bugs),
        review: Arc::new(review),
        ci: Arc::new(ci),
        store,
    })
}

fn driver(config: &Config, store: Arc<dyn JobStore>) -> Result<Driver> {
    let settings = RunSettings {
        current_release: config.current_release()?,
        retry: config.retry.policy(),
    };
    Ok(Driver::new(build_providers(config, store)?, settings))
}

async fn cmd_run(
    config: &Config,
    store: Arc<dyn JobStore>,
    library: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut config = config.clone();
    load_credentials(&mut config)?;
    let libraries = config.selected(library)?;

    let driver = driver(&config, store)?;
    info!(
        libraries = libraries.len(),
        release = %driver.settings().current_release,
        "starting run"
    );
    let report = driver.run(&libraries).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success() {
        bail!("{} of {} libraries failed", report.failed.len(), libraries.len());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    println!("  processed:   {}", report.processed.len());
    println!("  jobs created: {}", report.jobs_created);
    println!("  transitions: {}", report.transitions);
    for failure in &report.failed {
        println!("  FAILED {}: {}", failure.library, failure.error);
    }
}

async fn cmd_jobs(store: &dyn JobStore, library: Option<&str>, json: bool) -> Result<()> {
    let jobs = store
        .list_jobs(library)
        .await
        .context("Failed to list jobs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }
    for job in &jobs {
        println!("{}", job_line(job));
    }
    Ok(())
}

fn job_line(job: &Job) -> String {
    let ticket = job
        .ticket_id
        .map_or_else(|| "-".to_string(), |t| format!("bug {t}"));
    let relinquished = if job.relinquished { " (relinquished)" } else { "" };
    format!(
        "#{:<5} {:<12} {:<13} {:<12} {:<38} {:<24} {}{}",
        job.id.to_string(),
        job.library_name,
        job.job_type.as_str(),
        short_revision(&job.version),
        job.status.as_str(),
        job.outcome.as_str(),
        ticket,
        relinquished
    )
}

async fn cmd_check(config: &Config, store: Arc<dyn JobStore>, library: &str, json: bool) -> Result<()> {
    let library = config.library(library)?.clone();
    // Only version control and the vendoring tool are consulted, so no credentials.
    let driver = driver(config, store)?;
    let checks = driver
        .check(&library)
        .await
        .with_context(|| format!("Failed to check {}", library.name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        for check in &checks {
            print_check(check);
        }
    }
    Ok(())
}

fn print_check(check: &TaskCheck) {
    let Some(candidate) = &check.candidate else {
        println!("{}: up to date", check.job_type);
        return;
    };
    println!(
        "{}: upstream {} ({})",
        check.job_type,
        short_revision(&candidate.revision),
        candidate.timestamp.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  {} new, {} unseen", check.all_new.len(), check.unseen.len());
    for commit in &check.unseen {
        println!("    {} {}", commit.short(), commit.summary());
    }
}

async fn cmd_delete_job(store: &dyn JobStore, id: u64) -> Result<()> {
    store
        .delete_job(JobId(id))
        .await
        .with_context(|| format!("Failed to delete job {id}"))?;
    println!("Deleted job {id}");
    Ok(())
}
