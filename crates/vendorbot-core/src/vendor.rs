//! [`VendorTool`] adapter driving `./mach vendor` in the monorepo.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{Library, ProviderError};
use crate::process::{run_checked, run_command, DEFAULT_COMMAND_TIMEOUT};
use crate::providers::{ProviderResult, VendorOutcome, VendorResult, VendorTool};

/// Output text the vendoring tool prints when it left files for a human.
const PARTIAL_VENDOR_MARKER: &str = "could not be vendored";

/// Runs the monorepo's vendoring command.
#[derive(Debug, Clone)]
pub struct CommandVendorTool {
    monorepo: PathBuf,
    program: String,
    timeout: Duration,
}

impl CommandVendorTool {
    pub fn new(monorepo: impl Into<PathBuf>) -> Self {
        Self {
            monorepo: monorepo.into(),
            program: "./mach".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Replace `./mach` with another executable taking the same arguments.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn manifest(library: &Library) -> String {
        library.manifest_path.to_string_lossy().to_string()
    }
}

/// Parse `<revision> <timestamp>` as printed by `--check-for-update`.
fn parse_update_line(output: &str) -> ProviderResult<Option<(String, DateTime<Utc>)>> {
    let Some(line) = output.lines().map(str::trim).rfind(|l| !l.is_empty()) else {
        return Ok(None);
    };
    let (revision, timestamp) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| ProviderError::protocol("vendor", format!("bad update line {line:?}")))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ProviderError::protocol("vendor", format!("bad timestamp in {line:?}: {e}")))?;
    Ok(Some((revision.to_string(), timestamp)))
}

#[async_trait]
impl VendorTool for CommandVendorTool {
    async fn check_for_update(
        &self,
        library: &Library,
        branch: Option<&str>,
    ) -> ProviderResult<Option<(String, DateTime<Utc>)>> {
        if let Some(branch) = branch {
            // The manifest tracks one branch; other branches are resolved directly.
            let reference = format!("refs/heads/{branch}");
            let out = run_checked(
                "git",
                &["ls-remote", &library.upstream_url, &reference],
                &self.monorepo,
                self.timeout,
            )
            .await?;
            let revision = out.split_whitespace().next().map(str::to_string);
            return Ok(revision
                .filter(|rev| *rev != library.in_tree_revision)
                .map(|rev| (rev, Utc::now())));
        }

        let manifest = Self::manifest(library);
        let out = run_checked(
            &self.program,
            &["vendor", "--check-for-update", &manifest],
            &self.monorepo,
            self.timeout,
        )
        .await?;
        parse_update_line(&out)
    }

    async fn vendor(&self, library: &Library, revision: &str) -> ProviderResult<VendorOutcome> {
        let manifest = Self::manifest(library);
        let mut args = vec!["vendor", manifest.as_str(), "--revision", revision, "--ignore-modified"];
        if library.has_patches {
            args.extend(["--patch-mode", "none"]);
        }
        let out = run_command(&self.program, &args, &self.monorepo, self.timeout).await?;
        let combined = format!("{}\n{}", out.stdout, out.stderr);

        let result = if !out.success() {
            warn!(library = %library.name, code = out.exit_code, "vendoring failed");
            VendorResult::Failed
        } else if combined.to_ascii_lowercase().contains(PARTIAL_VENDOR_MARKER) {
            VendorResult::CouldNotVendorAllFiles
        } else {
            VendorResult::Success
        };
        info!(library = %library.name, revision, ?result, duration_ms = out.duration_ms, "vendored");
        Ok(VendorOutcome {
            result,
            message: combined.trim().to_string(),
        })
    }

    async fn apply_patches(&self, library: &Library) -> ProviderResult<()> {
        let manifest = Self::manifest(library);
        run_checked(
            &self.program,
            &["vendor", &manifest, "--patch-mode", "only"],
            &self.monorepo,
            self.timeout,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::test_library;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn update_line_parsing() {
        assert_eq!(parse_update_line("").unwrap(), None);
        let (rev, ts) = parse_update_line("noise\nabc123 2024-03-01T12:00:00+00:00\n")
            .unwrap()
            .unwrap();
        assert_eq!(rev, "abc123");
        assert_eq!(ts.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(parse_update_line("abc123").is_err());
    }

    /// A stand-in for `./mach` that echoes its arguments and reacts to a
    /// magic revision.
    fn fake_mach(dir: &std::path::Path) -> String {
        let path = dir.join("fake-mach");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             echo \"args: $*\"\n\
             case \"$*\" in\n\
               *partial*) echo 'file foo.c could not be vendored' ;;\n\
               *broken*) echo 'boom' >&2; exit 3 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn vendor_maps_exit_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CommandVendorTool::new(dir.path()).with_program(fake_mach(dir.path()));
        let mut lib = test_library("opus", "base");

        let ok = tool.vendor(&lib, "good").await.unwrap();
        assert_eq!(ok.result, VendorResult::Success);
        assert!(ok.message.contains("--revision good"));

        let partial = tool.vendor(&lib, "partial").await.unwrap();
        assert_eq!(partial.result, VendorResult::CouldNotVendorAllFiles);

        let failed = tool.vendor(&lib, "broken").await.unwrap();
        assert_eq!(failed.result, VendorResult::Failed);
        assert!(failed.message.contains("boom"));

        lib.has_patches = true;
        let patched = tool.vendor(&lib, "good").await.unwrap();
        assert!(patched.message.contains("--patch-mode none"));
    }
}
