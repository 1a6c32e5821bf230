//! Ordered fallback chain of request handlers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use hyper::Request;
use hyper::body::Incoming;
use parking_lot::RwLock;

use crate::transport::SocketHandler;

use super::response::HttpResponse;

// ============================================================================
// Handler
// ============================================================================

/// A handler in the cascade.
///
/// `path` is the request path with the session secret removed and
/// percent-decoded. Returning `None` passes the request to the next handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles a request, or declines it.
    async fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse>;
}

#[async_trait]
impl Handler for SocketHandler {
    async fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        SocketHandler::handle(self, request, path)
    }
}

// ============================================================================
// Cascade
// ============================================================================

/// Handlers tried in insertion order.
#[derive(Default)]
pub struct Cascade {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl Cascade {
    /// Creates an empty cascade.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler.
    #[must_use]
    pub fn with(self, handler: Arc<dyn Handler>) -> Self {
        self.add(handler);
        self
    }

    /// Appends a handler.
    pub fn add(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    /// Returns the number of handlers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns `true` if the cascade has no handlers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[async_trait]
impl Handler for Cascade {
    async fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            if let Some(response) = handler.handle(request, path).await {
                return Some(response);
            }
        }
        None
    }
}
