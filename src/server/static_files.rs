//! Files served from a directory.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use hyper::Request;
use hyper::body::Incoming;
use tracing::trace;

use super::cascade::Handler;
use super::response::{self, HttpResponse};

// ============================================================================
// StaticFiles
// ============================================================================

/// Serves files under a root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Serves files under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` under the root, rejecting traversal outside it.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, _request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        let file = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&file).await.ok()?;
        if !metadata.is_file() {
            return None;
        }

        let contents = tokio::fs::read(&file).await.ok()?;
        trace!(path = %path, root = %self.root.display(), "Serving static file");
        Some(response::ok(&response::content_type_for(path), contents))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_traversal() {
        let files = StaticFiles::new("/srv/root");
        assert_eq!(
            files.resolve("test/foo.html"),
            Some(PathBuf::from("/srv/root/test/foo.html"))
        );
        assert!(files.resolve("../etc/passwd").is_none());
        assert!(files.resolve("/etc/passwd").is_none());
        assert!(files.resolve("a/./b").is_some());
    }
}
