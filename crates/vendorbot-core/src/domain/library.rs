//! Tracked libraries and the tasks attached to them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use vendorbot_state::JobType;

use super::commit::Commit;
use super::error::VendorbotError;

/// Platform the first, cheap try run targets unless a task overrides it.
pub const DEFAULT_INITIAL_PLATFORM: &str = "linux64";

/// How often a task may act on new upstream work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    /// Every invocation.
    Every,
    /// Once per release train.
    Release,
    Weeks(u32),
    Commits(u32),
    /// Both windows must have elapsed.
    WeeksAndCommits { weeks: u32, commits: u32 },
}

impl Frequency {
    pub fn is_time_or_release_based(&self) -> bool {
        matches!(
            self,
            Frequency::Release | Frequency::Weeks(_) | Frequency::WeeksAndCommits { .. }
        )
    }
}

impl FromStr for Frequency {
    type Err = VendorbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "every" => return Ok(Frequency::Every),
            "release" => return Ok(Frequency::Release),
            _ => {}
        }

        let invalid = || VendorbotError::InvalidFrequency(s.to_string());
        let part = Regex::new(r"^(\d+)\s+(week|weeks|commit|commits)$").map_err(|_| invalid())?;

        let mut weeks = None;
        let mut commits = None;
        for piece in normalized.split(',').map(str::trim) {
            let caps = part.captures(piece).ok_or_else(invalid)?;
            let n: u32 = caps[1].parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(invalid());
            }
            let slot = if caps[2].starts_with("week") {
                &mut weeks
            } else {
                &mut commits
            };
            if slot.replace(n).is_some() {
                return Err(invalid());
            }
        }

        match (weeks, commits) {
            (Some(weeks), Some(commits)) => Ok(Frequency::WeeksAndCommits { weeks, commits }),
            (Some(weeks), None) => Ok(Frequency::Weeks(weeks)),
            (None, Some(commits)) => Ok(Frequency::Commits(commits)),
            (None, None) => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = VendorbotError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Every => f.write_str("every"),
            Frequency::Release => f.write_str("release"),
            Frequency::Weeks(n) => write!(f, "{n} weeks"),
            Frequency::Commits(n) => write!(f, "{n} commits"),
            Frequency::WeeksAndCommits { weeks, commits } => {
                write!(f, "{weeks} weeks, {commits} commits")
            }
        }
    }
}

/// Which upstream commits a task cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "kebab-case")]
pub enum CommitFilter {
    #[default]
    None,
    /// Keep commits touching at least one file with one of these extensions.
    SourceExtensions(Vec<String>),
    /// Keep commits touching at least one file under one of these paths.
    PathPrefixes(Vec<String>),
}

impl CommitFilter {
    /// `commit` must already have its details populated unless the filter is `None`.
    pub fn keeps(&self, commit: &Commit) -> bool {
        let files = || commit.details().into_iter().flat_map(|d| d.all_files());
        match self {
            CommitFilter::None => true,
            CommitFilter::SourceExtensions(exts) => files().any(|f| {
                f.rsplit_once('.')
                    .map_or(false, |(_, ext)| exts.iter().any(|e| e.trim_start_matches('.') == ext))
            }),
            CommitFilter::PathPrefixes(prefixes) => {
                files().any(|f| prefixes.iter().any(|p| f.starts_with(p.as_str())))
            }
        }
    }

    pub fn apply(&self, commits: Vec<Commit>) -> Vec<Commit> {
        commits.into_iter().filter(|c| self.keeps(c)).collect()
    }
}

fn default_initial_platform() -> String {
    DEFAULT_INITIAL_PLATFORM.to_string()
}

/// A policy attached to a library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub frequency: Frequency,
    /// Upstream branch to track; the vendoring tool's default when absent.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub filter: CommitFilter,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub needinfo: Vec<String>,
    /// Ticket that new tickets should block.
    #[serde(default)]
    pub blocking: Option<u64>,
    /// Overrides the library maintainer as reviewer.
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default = "default_initial_platform")]
    pub initial_platform: String,
}

/// A third-party source tree vendored into the monorepo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub upstream_url: String,
    /// Upstream revision currently vendored in the tree.
    pub in_tree_revision: String,
    /// Path of the vendoring manifest, relative to the monorepo root.
    pub manifest_path: PathBuf,
    pub maintainer_bugzilla: String,
    pub maintainer_phabricator: String,
    pub bugzilla_product: String,
    pub bugzilla_component: String,
    /// The vendoring tool applies local patches after vendoring.
    #[serde(default)]
    pub has_patches: bool,
    pub tasks: Vec<Task>,
}

impl Library {
    pub fn reviewer_for(&self, task: &Task) -> String {
        task.reviewer
            .clone()
            .unwrap_or_else(|| self.maintainer_phabricator.clone())
    }

    pub fn task(&self, job_type: JobType) -> Option<&Task> {
        self.tasks.iter().find(|t| t.job_type == job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commit::{CommitDetails, UpstreamHost};
    use chrono::Utc;

    #[test]
    fn frequency_parsing() {
        assert_eq!("every".parse::<Frequency>().unwrap(), Frequency::Every);
        assert_eq!("Release".parse::<Frequency>().unwrap(), Frequency::Release);
        assert_eq!("1 week".parse::<Frequency>().unwrap(), Frequency::Weeks(1));
        assert_eq!("10 commits".parse::<Frequency>().unwrap(), Frequency::Commits(10));
        assert_eq!(
            "2 weeks, 5 commits".parse::<Frequency>().unwrap(),
            Frequency::WeeksAndCommits { weeks: 2, commits: 5 }
        );
    }

    #[test]
    fn frequency_rejects_garbage() {
        for bad in ["", "weekly", "0 weeks", "2 weeks, 3 weeks", "3 days"] {
            assert!(bad.parse::<Frequency>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn frequency_display_parses_back() {
        let f = Frequency::WeeksAndCommits { weeks: 3, commits: 7 };
        assert_eq!(f.to_string().parse::<Frequency>().unwrap(), f);
    }

    fn commit_with(files: &[&str]) -> Commit {
        let mut c = Commit::new("abc", Utc::now(), Utc::now(), UpstreamHost::Generic);
        c.set_details(CommitDetails {
            summary: "s".into(),
            author: "a".into(),
            modified: files.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        c
    }

    #[test]
    fn source_extension_filter() {
        let filter = CommitFilter::SourceExtensions(vec![".c".into(), "h".into()]);
        assert!(filter.keeps(&commit_with(&["src/decode.c"])));
        assert!(filter.keeps(&commit_with(&["README.md", "include/api.h"])));
        assert!(!filter.keeps(&commit_with(&["README.md", "ci/build.yml"])));
    }

    #[test]
    fn path_prefix_filter() {
        let filter = CommitFilter::PathPrefixes(vec!["src/".into()]);
        assert!(filter.keeps(&commit_with(&["src/lib.c"])));
        assert!(!filter.keeps(&commit_with(&["doc/src/readme"])));
    }
}
