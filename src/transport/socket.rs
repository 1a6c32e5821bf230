//! One-shot WebSocket upgrade paths.
//!
//! Each browser manager gets its own upgrade path under the session secret.
//! A path is consumed by the first upgrade request that reaches it; later
//! requests to the same path fall through to the rest of the cascade.
//!
//! # Connection Flow
//!
//! 1. [`SocketHandler::create`] allocates `socket/<id>` and a receiver
//! 2. The browser host page opens a WebSocket to that path
//! 3. The upgrade response is returned and the upgraded stream is handed to
//!    the receiver

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use hyper::body::Incoming;
use hyper::header::{CONNECTION, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::upgrade::Upgraded;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SocketId;
use crate::server::response::{self, HttpResponse};

// ============================================================================
// Constants
// ============================================================================

/// Path segment under which upgrade paths live.
pub const SOCKET_PREFIX: &str = "socket/";

// ============================================================================
// Types
// ============================================================================

/// Server side of an upgraded browser socket.
pub type BrowserSocket = WebSocketStream<TokioIo<Upgraded>>;

// ============================================================================
// SocketHandler
// ============================================================================

/// Table of pending one-shot upgrade paths.
#[derive(Default)]
pub struct SocketHandler {
    /// Waiters keyed by socket ID.
    waiters: Mutex<FxHashMap<SocketId, oneshot::Sender<BrowserSocket>>>,
}

impl SocketHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new upgrade path.
    ///
    /// Returns the path relative to the session root and a [`PendingSocket`]
    /// resolving once a browser connects to it.
    pub fn create(&self) -> (String, PendingSocket) {
        let id = SocketId::next();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);

        let path = format!("{SOCKET_PREFIX}{id}");
        debug!(path = %path, "Upgrade path created");

        (path, PendingSocket { rx })
    }

    /// Returns the number of paths not yet consumed.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Drops every pending path, failing their receivers.
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    /// Handles a request for `path`, consuming the upgrade path on a match.
    ///
    /// Requests that are not WebSocket upgrades get a 400 and leave the
    /// path pending.
    pub fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        let id = path.strip_prefix(SOCKET_PREFIX).and_then(SocketId::parse)?;

        let upgrade = is_upgrade_request(request);
        let key = request.headers().get(SEC_WEBSOCKET_KEY).filter(|_| upgrade);
        let Some(key) = key else {
            if !self.waiters.lock().contains_key(&id) {
                return None;
            }
            warn!(socket = %id, "Non-upgrade request to socket path");
            return Some(response::text(
                StatusCode::BAD_REQUEST,
                "Expected a WebSocket upgrade request.",
            ));
        };
        let accept = derive_accept_key(key.as_bytes());
        let tx = self.waiters.lock().remove(&id)?;

        let on_upgrade = hyper::upgrade::on(request);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let io = TokioIo::new(upgraded);
                    let stream = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
                    info!(socket = %id, "WebSocket connection established");
                    let _ = tx.send(stream);
                }
                Err(e) => warn!(socket = %id, error = %e, "WebSocket upgrade failed"),
            }
        });

        Some(response::switching_protocols(&accept))
    }
}

// ============================================================================
// PendingSocket
// ============================================================================

/// A browser socket that has not connected yet.
pub struct PendingSocket {
    rx: oneshot::Receiver<BrowserSocket>,
}

impl PendingSocket {
    /// Waits for the browser to connect.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if nothing connects within `limit`
    /// - [`Error::Connection`] if the path was dropped or the upgrade failed
    pub async fn accept(self, limit: Duration) -> Result<BrowserSocket> {
        match timeout(limit, self.rx).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(_)) => Err(Error::connection("WebSocket upgrade path was dropped")),
            Err(_) => Err(Error::connection_timeout(millis(limit))),
        }
    }
}

/// Whole milliseconds in `limit`, saturating.
fn millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

/// Returns `true` if the headers request a WebSocket upgrade.
#[must_use]
pub fn is_upgrade_request(request: &Request<Incoming>) -> bool {
    request
        .headers()
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
        && request
            .headers()
            .get(CONNECTION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("upgrade"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_allocates_unique_paths() {
        let handler = SocketHandler::new();
        let (a, _ra) = handler.create();
        let (b, _rb) = handler.create();

        assert!(a.starts_with(SOCKET_PREFIX));
        assert_ne!(a, b);
        assert_eq!(handler.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_cleared_path_fails_waiter() {
        let handler = SocketHandler::new();
        let (_, pending) = handler.create();
        handler.clear();

        let err = pending
            .accept(Duration::from_millis(50))
            .await
            .expect_err("dropped path should fail");
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_accept_times_out() {
        let handler = SocketHandler::new();
        let (_, pending) = handler.create();

        let err = pending
            .accept(Duration::from_millis(20))
            .await
            .expect_err("nothing connects");
        assert!(matches!(err, Error::ConnectionTimeout { .. }));
    }
}
