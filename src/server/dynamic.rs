//! Table of generated files.
//!
//! The compiler pool publishes each compiled artifact here under its URL
//! path. Entries point at files on disk and are read per request.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use async_trait::async_trait;
use hyper::Request;
use hyper::body::Incoming;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::cascade::Handler;
use super::response::{self, HttpResponse};

// ============================================================================
// DynamicFiles
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    file: PathBuf,
    content_type: String,
}

/// Generated files keyed by URL path.
#[derive(Debug, Default)]
pub struct DynamicFiles {
    entries: RwLock<FxHashMap<String, Entry>>,
}

impl DynamicFiles {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `file` at `path` with `content_type`, replacing any earlier entry.
    pub fn register(&self, path: impl Into<String>, file: impl Into<PathBuf>, content_type: &str) {
        let path = path.into();
        let file = file.into();
        debug!(path = %path, file = %file.display(), "Dynamic route registered");
        self.entries.write().insert(
            path,
            Entry {
                file,
                content_type: content_type.to_string(),
            },
        );
    }

    /// Returns `true` if `path` is registered.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Returns the number of registered paths.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Handler for DynamicFiles {
    async fn handle(&self, _request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        let entry = self.entries.read().get(path).cloned()?;

        match tokio::fs::read(&entry.file).await {
            Ok(contents) => Some(response::ok(&entry.content_type, contents)),
            Err(e) => {
                warn!(path = %path, error = %e, "Registered file unreadable");
                None
            }
        }
    }
}
