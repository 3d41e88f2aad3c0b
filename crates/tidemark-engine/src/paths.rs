//! Project root discovery and relative path resolution.

use std::path::{Path, PathBuf};

/// File whose presence marks a project root.
pub const PROJECT_MARKER: &str = "tidemark.yaml";

/// Base directory for relative definition and output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot(PathBuf);

impl ProjectRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    /// Nearest ancestor of `start` (inclusive) holding [`PROJECT_MARKER`],
    /// falling back to `start` itself.
    #[must_use]
    pub fn discover(start: &Path) -> Self {
        let found = start
            .ancestors()
            .find(|dir| dir.join(PROJECT_MARKER).is_file())
            .unwrap_or(start);
        Self(found.to_path_buf())
    }

    /// Absolute paths pass through; relative ones are joined onto the root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.0.join(path)
        }
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}
