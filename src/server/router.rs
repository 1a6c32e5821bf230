//! Secret scoping in front of the cascade.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use hyper::Request;
use hyper::body::{Bytes, Incoming};
use tracing::{debug, trace};

use crate::identifiers::Secret;

use super::assets;
use super::cascade::{Cascade, Handler};
use super::naming::FAVICON;
use super::response::{self, HttpResponse};

// ============================================================================
// Router
// ============================================================================

/// Entry point for every request.
///
/// Only the favicon is served outside `/<secret>/`; anything else without
/// the prefix is rejected before reaching a handler.
pub struct Router {
    secret: Secret,
    cascade: Arc<Cascade>,
    favicon: Bytes,
}

impl Router {
    /// Creates a router in front of `cascade`.
    #[must_use]
    pub fn new(secret: Secret, cascade: Arc<Cascade>) -> Self {
        Self {
            secret,
            cascade,
            favicon: Bytes::from(assets::favicon()),
        }
    }

    /// Routes one request.
    pub async fn route(&self, mut request: Request<Incoming>) -> HttpResponse {
        let raw = request.uri().path().to_string();
        trace!(method = %request.method(), path = %raw, "Request");

        if raw == FAVICON {
            return response::ok("image/x-icon", self.favicon.clone());
        }

        let Some(scoped) = strip_secret(&raw, self.secret.as_str()) else {
            debug!(path = %raw, "Request outside the session secret");
            return response::not_found();
        };

        let Ok(path) = urlencoding::decode(scoped) else {
            return response::not_found();
        };

        self.cascade
            .handle(&mut request, &path)
            .await
            .unwrap_or_else(response::not_found)
    }
}

/// Returns the part of `path` after `/<secret>/`.
#[must_use]
pub fn strip_secret<'a>(path: &'a str, secret: &str) -> Option<&'a str> {
    path.strip_prefix('/')?
        .strip_prefix(secret)?
        .strip_prefix('/')
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_secret() {
        assert_eq!(strip_secret("/abc/test/foo.html", "abc"), Some("test/foo.html"));
        assert_eq!(strip_secret("/abc/", "abc"), Some(""));
        assert_eq!(strip_secret("/abc", "abc"), None);
        assert_eq!(strip_secret("/abcd/foo", "abc"), None);
        assert_eq!(strip_secret("/test/foo.html", "abc"), None);
    }
}
