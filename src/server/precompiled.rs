//! Precompiled output roots.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hyper::Request;
use hyper::body::Incoming;
use parking_lot::RwLock;
use tracing::debug;

use super::cascade::Handler;
use super::response::HttpResponse;
use super::static_files::StaticFiles;

// ============================================================================
// PrecompiledRoots
// ============================================================================

/// Directories of precompiled suites, tried in registration order.
///
/// Registering a root twice has no effect.
#[derive(Debug, Default)]
pub struct PrecompiledRoots {
    roots: RwLock<Vec<StaticFiles>>,
}

impl PrecompiledRoots {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `root`. Returns `false` if it was already mounted.
    pub fn register(&self, root: impl Into<PathBuf>) -> bool {
        let root = root.into();
        let mut roots = self.roots.write();
        if roots.iter().any(|files| files.root() == root) {
            return false;
        }

        debug!(root = %root.display(), "Precompiled root mounted");
        roots.push(StaticFiles::new(root));
        true
    }

    /// Returns `true` if `root` is mounted.
    #[must_use]
    pub fn contains(&self, root: &Path) -> bool {
        self.roots.read().iter().any(|files| files.root() == root)
    }

    /// Returns the number of mounted roots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.read().len()
    }

    /// Returns `true` if nothing is mounted.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.read().is_empty()
    }
}

#[async_trait]
impl Handler for PrecompiledRoots {
    async fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        let roots = self.roots.read().clone();
        for root in roots {
            if let Some(response) = root.handle(request, path).await {
                return Some(response);
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
