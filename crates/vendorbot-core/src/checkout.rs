//! Scratch checkout of an upstream repository.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// A temporary directory holding one library's upstream clone.
///
/// The directory is removed when the guard is dropped, whether or not the
/// processing that used it succeeded.
#[derive(Debug)]
pub struct ScratchCheckout {
    dir: TempDir,
    repo: PathBuf,
}

impl ScratchCheckout {
    /// Create an empty scratch directory; the clone goes into `<dir>/upstream`.
    pub fn create(library: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("vendorbot-{library}-"))
            .tempdir()?;
        let repo = dir.path().join("upstream");
        debug!(library, path = %dir.path().display(), "scratch checkout created");
        Ok(Self { dir, repo })
    }

    /// Where the repository lives inside the scratch directory.
    pub fn path(&self) -> &Path {
        &self.repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop() {
        let checkout = ScratchCheckout::create("opus").unwrap();
        let root = checkout.root().to_path_buf();
        assert!(root.exists());
        assert!(checkout.path().starts_with(&root));
        drop(checkout);
        assert!(!root.exists());
    }
}
