//! `vendorbot.toml`: tracked libraries and service endpoints.
//!
//! Credentials never live in this file. They are read from the environment
//! when the remote clients are built.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use vendorbot_core::{Library, RetryPolicy};
use vendorbot_remote::{BugzillaConfig, PhabricatorConfig, TreeherderConfig};

pub const DEFAULT_CONFIG_PATH: &str = "vendorbot.toml";

/// Monorepo file holding the current release train, e.g. `140.0a1`.
const MILESTONE_PATH: &str = "config/milestone.txt";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Checkout of the monorepo the libraries are vendored into.
    pub monorepo: PathBuf,
    /// Overrides the release read from the monorepo's milestone file.
    #[serde(default)]
    pub current_release: Option<String>,
    /// SurrealDB endpoint; `VENDORBOT_DB_URL` or local persistence when absent.
    #[serde(default)]
    pub database: Option<String>,
    /// Base ref in the monorepo that vendoring commits are made on top of.
    #[serde(default)]
    pub base_ref: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
    pub bugzilla: BugzillaConfig,
    pub phabricator: PhabricatorConfig,
    pub treeherder: TreeherderConfig,
    #[serde(default)]
    pub libraries: Vec<Library>,
}

/// Backoff for transient remote failures.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_initial_delay_secs() -> u64 {
    RetryPolicy::default().initial_delay.as_secs()
}

fn default_max_delay_secs() -> u64 {
    RetryPolicy::default().max_delay.as_secs()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for library in &self.libraries {
            if !names.insert(library.name.as_str()) {
                bail!("library {} is configured more than once", library.name);
            }
            if library.tasks.is_empty() {
                bail!("library {} has no tasks", library.name);
            }
            let mut types = BTreeSet::new();
            for task in &library.tasks {
                if !types.insert(task.job_type) {
                    bail!(
                        "library {} has more than one {} task",
                        library.name,
                        task.job_type
                    );
                }
            }
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn library(&self, name: &str) -> Result<&Library> {
        self.libraries
            .iter()
            .find(|l| l.name == name)
            .with_context(|| format!("No library named {name} in the config"))
    }

    /// Libraries a command applies to: one by name, or all of them.
    pub fn selected(&self, name: Option<&str>) -> Result<Vec<Library>> {
        match name {
            Some(name) => Ok(vec![self.library(name)?.clone()]),
            None => Ok(self.libraries.clone()),
        }
    }

    /// The configured release, or the major version from the milestone file.
    pub fn current_release(&self) -> Result<String> {
        if let Some(release) = &self.current_release {
            return Ok(release.clone());
        }
        let path = self.monorepo.join(MILESTONE_PATH);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_milestone(&text).with_context(|| format!("No milestone found in {}", path.display()))
    }
}

/// Major version from a milestone file: the first non-comment line, up to the first dot.
fn parse_milestone(text: &str) -> Option<String> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;
    let major = line.split('.').next()?;
    (!major.is_empty() && major.chars().all(|c| c.is_ascii_digit())).then(|| major.to_string())
}
