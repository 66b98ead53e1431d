//! Upstream commits with lazily populated details.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Link-building rule for the upstream host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "host", content = "base", rename_all = "lowercase")]
pub enum UpstreamHost {
    /// `https://github.com/owner/repo`
    GitHub(String),
    /// `https://gitlab.example.org/group/repo`
    GitLab(String),
    /// `https://chromium.googlesource.com/repo`
    GoogleSource(String),
    /// No known web UI; links are bare revisions.
    Generic,
}

impl UpstreamHost {
    /// Derive the link rule from a clone URL.
    pub fn from_url(url: &str) -> Self {
        let base = url.trim_end_matches('/').trim_end_matches(".git").to_string();
        if !base.starts_with("https://") && !base.starts_with("http://") {
            return UpstreamHost::Generic;
        }
        if base.contains("github.com/") {
            UpstreamHost::GitHub(base)
        } else if base.contains("googlesource.com/") {
            UpstreamHost::GoogleSource(base)
        } else if base.contains("gitlab") || base.contains("code.videolan.org/") {
            UpstreamHost::GitLab(base)
        } else {
            UpstreamHost::Generic
        }
    }

    pub fn commit_url(&self, revision: &str) -> String {
        match self {
            UpstreamHost::GitHub(base) => format!("{base}/commit/{revision}"),
            UpstreamHost::GitLab(base) => format!("{base}/-/commit/{revision}"),
            UpstreamHost::GoogleSource(base) => format!("{base}/+/{revision}"),
            UpstreamHost::Generic => revision.to_string(),
        }
    }

    pub fn compare_url(&self, from: &str, to: &str) -> Option<String> {
        match self {
            UpstreamHost::GitHub(base) => Some(format!("{base}/compare/{from}...{to}")),
            UpstreamHost::GitLab(base) => Some(format!("{base}/-/compare/{from}...{to}")),
            UpstreamHost::GoogleSource(base) => Some(format!("{base}/+log/{from}..{to}")),
            UpstreamHost::Generic => None,
        }
    }
}

/// The expensive part of a commit, read on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetails {
    pub summary: String,
    pub author: String,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Renames, copies and type changes.
    pub other: Vec<String>,
}

impl CommitDetails {
    pub fn all_files(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .chain(&self.other)
            .map(String::as_str)
    }
}

/// First twelve characters of a revision or tag, for display.
pub fn short_revision(revision: &str) -> &str {
    match revision.char_indices().nth(12) {
        Some((end, _)) => &revision[..end],
        None => revision,
    }
}

/// An upstream commit. Equality and hashing use the revision only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub revision: String,
    pub author_date: DateTime<Utc>,
    pub commit_date: DateTime<Utc>,
    host: UpstreamHost,
    details: Option<CommitDetails>,
}

impl Commit {
    pub fn new(
        revision: impl Into<String>,
        author_date: DateTime<Utc>,
        commit_date: DateTime<Utc>,
        host: UpstreamHost,
    ) -> Self {
        Self {
            revision: revision.into(),
            author_date,
            commit_date,
            host,
            details: None,
        }
    }

    pub fn short(&self) -> &str {
        short_revision(&self.revision)
    }

    pub fn link(&self) -> String {
        self.host.commit_url(&self.revision)
    }

    pub fn host(&self) -> &UpstreamHost {
        &self.host
    }

    pub fn details(&self) -> Option<&CommitDetails> {
        self.details.as_ref()
    }

    pub fn is_populated(&self) -> bool {
        self.details.is_some()
    }

    /// Attach details. A second call is a no-op.
    pub fn set_details(&mut self, details: CommitDetails) {
        if self.details.is_none() {
            self.details = Some(details);
        }
    }

    pub fn summary(&self) -> &str {
        self.details.as_ref().map_or("", |d| d.summary.as_str())
    }
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.revision == other.revision
    }
}

impl Eq for Commit {}

impl Hash for Commit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.revision.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn short_revision_respects_char_boundaries() {
        assert_eq!(short_revision("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_revision("v1.2"), "v1.2");
        assert_eq!(short_revision("version-ünïcödé-1"), "version-ünïc");
    }

    #[test]
    fn host_detection_and_links() {
        let gh = UpstreamHost::from_url("https://github.com/xiph/opus.git");
        assert_eq!(gh.commit_url("abc"), "https://github.com/xiph/opus/commit/abc");
        assert_eq!(
            gh.compare_url("a", "b").unwrap(),
            "https://github.com/xiph/opus/compare/a...b"
        );

        let vl = UpstreamHost::from_url("https://code.videolan.org/videolan/dav1d");
        assert_eq!(vl.commit_url("abc"), "https://code.videolan.org/videolan/dav1d/-/commit/abc");
        assert_eq!(UpstreamHost::from_url("https://example.org/repo"), UpstreamHost::Generic);
        let gl = UpstreamHost::from_url("https://gitlab.freedesktop.org/cairo/cairo");
        assert_eq!(gl.commit_url("abc"), "https://gitlab.freedesktop.org/cairo/cairo/-/commit/abc");

        let gs = UpstreamHost::from_url("https://chromium.googlesource.com/webm/libvpx");
        assert_eq!(gs.commit_url("abc"), "https://chromium.googlesource.com/webm/libvpx/+/abc");

        assert_eq!(UpstreamHost::from_url("git@github.com:a/b"), UpstreamHost::Generic);
    }

    #[test]
    fn equality_by_revision_only() {
        let now = Utc::now();
        let mut a = Commit::new("abc", now, now, UpstreamHost::Generic);
        let b = Commit::new("abc", now - chrono::Duration::days(1), now, UpstreamHost::Generic);
        a.set_details(CommitDetails::default());
        assert_eq!(a, b);

        let set: HashSet<Commit> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn populate_is_idempotent() {
        let now = Utc::now();
        let mut c = Commit::new("abc", now, now, UpstreamHost::Generic);
        c.set_details(CommitDetails {
            summary: "first".into(),
            ..Default::default()
        });
        c.set_details(CommitDetails {
            summary: "second".into(),
            ..Default::default()
        });
        assert_eq!(c.summary(), "first");
    }
}
