//! HTTP server and request routing.
//!
//! Every request except the favicon is scoped under the session secret and
//! then passed through a [`Cascade`] of handlers, in this order:
//!
//! | # | Handler | Serves |
//! |---|---------|--------|
//! | 1 | [`SocketHandler`](crate::transport::SocketHandler) | One-shot WebSocket upgrades |
//! | 2 | [`StaticFiles`] | The root directory |
//! | 3 | [`DynamicFiles`] | Compiled artifacts |
//! | 4 | [`PrecompiledRoots`] | Precompiled output directories |
//! | 5 | [`SyntheticFiles`] | Wrapper pages, bootstrap scripts, host page |
//! | 6 | [`ExternalBuild`](crate::external::ExternalBuild) | Passthrough to an external build server |

// ============================================================================
// Submodules
// ============================================================================

/// Embedded pages and scripts.
pub mod assets;

/// Handler trait and fallback chain.
pub mod cascade;

/// Table of compiled artifacts.
pub mod dynamic;

/// Served file naming.
pub mod naming;

/// Precompiled output roots.
pub mod precompiled;

/// Response constructors.
pub mod response;

/// Secret scoping.
pub mod router;

/// Directory serving.
pub mod static_files;

/// Generated pages and scripts.
pub mod synthetic;

// ============================================================================
// Imports
// ============================================================================

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use cascade::{Cascade, Handler};
pub use dynamic::DynamicFiles;
pub use precompiled::PrecompiledRoots;
pub use response::HttpResponse;
pub use router::Router;
pub use static_files::StaticFiles;
pub use synthetic::SyntheticFiles;

// ============================================================================
// HttpServer
// ============================================================================

/// Loopback HTTP server driving a [`Router`].
pub struct HttpServer {
    /// Bound address.
    addr: SocketAddr,
    /// Flips to `true` on close.
    shutdown: watch::Sender<bool>,
    /// Accept loop task.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpServer {
    /// Binds an ephemeral loopback port and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(router: Arc<Router>) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(port = addr.port(), "HTTP server listening");
        let task = tokio::spawn(accept_loop(listener, router, shutdown_rx));

        Ok(Self {
            addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops accepting and drops open HTTP connections.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!(port = self.addr.port(), "HTTP server closed");
        }
    }
}

/// Accepts connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Accept loop started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(serve_connection(stream, addr, Arc::clone(&router), shutdown.clone()));
                }
                Err(e) => error!(error = %e, "Accept failed"),
            }
        }
    }

    debug!("Accept loop terminated");
}

/// Serves one HTTP/1 connection, allowing WebSocket upgrades.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) {
    let service = service_fn(move |request| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(router.route(request).await) }
    });

    let connection = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();

    tokio::select! {
        result = connection => {
            if let Err(e) = result {
                debug!(error = %e, ?addr, "Connection ended with error");
            }
        }
        _ = shutdown.changed() => debug!(?addr, "Connection dropped on shutdown"),
    }
}
