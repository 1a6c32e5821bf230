//! Live browser manager.
//!
//! A [`BrowserManager`] owns one running browser and the WebSocket its host
//! page opened back to the server. Suites are loaded into the browser over
//! the control channel and each gets its own virtual channel.
//!
//! # Lifecycle
//!
//! 1. Allocate a one-shot upgrade path and build the host URL
//! 2. Launch the browser on the host URL
//! 3. Wait for the browser to connect (or exit, or time out)
//! 4. Serve `loadSuite` requests until the socket ends or [`close`] is called
//!
//! [`close`]: BrowserManager::close

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SuiteId;
use crate::server::naming::HOST_PAGE;
use crate::stack_trace::StackTraceMapper;
use crate::transport::{Connection, SocketHandler};

use super::launcher::{Browser, BrowserLauncher};
use super::suite::RunnerSuite;
use super::{BrowserIdentity, ExecutableSettings};

// ============================================================================
// ManagerOptions
// ============================================================================

/// Settings shared by every manager of a session.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Ask the host page to pause after each load.
    pub pause_after_load: bool,
    /// How long a launched browser has to connect.
    pub connect_timeout: Duration,
    /// Suites that may load concurrently in one browser.
    pub suite_concurrency: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            pause_after_load: false,
            connect_timeout: Duration::from_secs(30),
            suite_concurrency: 8,
        }
    }
}

// ============================================================================
// BrowserManager
// ============================================================================

/// A running browser and its control connection.
pub struct BrowserManager {
    /// Identity this browser was launched as.
    identity: BrowserIdentity,
    /// Multiplexed socket to the host page.
    connection: Connection,
    /// Browser process handle.
    browser: Arc<dyn Browser>,
    /// Load slots.
    suite_slots: Arc<Semaphore>,
    /// Next suite ID.
    next_suite: AtomicU64,
    /// Set by [`close`](Self::close) or when the socket ends.
    closed: Arc<AtomicBool>,
    /// Pending `displayPause`, completed by `resume`.
    pause: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// ============================================================================
// BrowserManager - Startup
// ============================================================================

impl BrowserManager {
    /// Launches `identity` and waits for its host page to connect.
    ///
    /// # Errors
    ///
    /// - [`Error::LaunchFailed`] if the browser cannot be spawned or exits
    ///   before connecting
    /// - [`Error::ConnectionTimeout`] if it does not connect in time
    pub async fn start(
        identity: BrowserIdentity,
        launcher: &dyn BrowserLauncher,
        settings: Option<ExecutableSettings>,
        sockets: &SocketHandler,
        session_url: &Url,
        options: &ManagerOptions,
    ) -> Result<Self> {
        let (socket_path, pending) = sockets.create();
        let host_url = host_url(session_url, &socket_path, options.pause_after_load)?;

        debug!(browser = %identity, url = %host_url, "Launching browser");
        let browser: Arc<dyn Browser> = Arc::from(
            launcher
                .launch(&identity, &host_url, settings.as_ref())
                .await?,
        );

        let socket = tokio::select! {
            socket = pending.accept(options.connect_timeout) => socket,
            () = browser.wait_exit() => {
                Err(Error::launch_failed(
                    identity.name(),
                    format!("{} exited before connecting", identity.name()),
                ))
            }
        };

        let socket = match socket {
            Ok(socket) => socket,
            Err(e) => {
                warn!(browser = %identity, error = %e, "Browser failed to connect");
                let _ = browser.close().await;
                return Err(e);
            }
        };

        info!(browser = %identity, "Browser connected");
        let (connection, control_rx) = Connection::new(socket);
        Ok(Self::attach(identity, connection, control_rx, browser, options))
    }

    /// Wraps an established connection and starts the control task.
    pub(crate) fn attach(
        identity: BrowserIdentity,
        connection: Connection,
        control_rx: mpsc::UnboundedReceiver<Value>,
        browser: Arc<dyn Browser>,
        options: &ManagerOptions,
    ) -> Self {
        let manager = Self {
            identity,
            connection,
            browser,
            suite_slots: Arc::new(Semaphore::new(options.suite_concurrency.max(1))),
            next_suite: AtomicU64::new(0),
            closed: Arc::new(AtomicBool::new(false)),
            pause: Arc::new(Mutex::new(None)),
        };

        tokio::spawn(run_control_loop(
            manager.identity.name().to_string(),
            control_rx,
            Arc::clone(&manager.browser),
            Arc::clone(&manager.closed),
            Arc::clone(&manager.pause),
            Arc::clone(&manager.suite_slots),
        ));

        manager
    }
}

// ============================================================================
// BrowserManager - Operations
// ============================================================================

impl BrowserManager {
    /// Returns the identity of this browser.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &BrowserIdentity {
        &self.identity
    }

    /// Returns `true` once the manager is closed or its browser disconnected.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.connection.is_closed()
    }

    /// Loads the suite at `url` in the browser.
    ///
    /// Resolves once the browser reports the suite is ready.
    ///
    /// # Errors
    ///
    /// - [`Error::LoadFailure`] if the browser reports a load error
    /// - [`Error::ConnectionClosed`] if the browser disconnects first
    pub async fn load(
        &self,
        path: &Path,
        mut url: Url,
        metadata: &Value,
        extra: Value,
        mapper: Option<Arc<StackTraceMapper>>,
    ) -> Result<RunnerSuite> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let id = SuiteId::new(self.next_suite.fetch_add(1, Ordering::Relaxed));
        let fragment = json!({
            "metadata": metadata,
            "browser": self.identity.identifier(),
        });
        url.set_fragment(Some(&urlencoding::encode(&fragment.to_string())));

        let permit = Arc::clone(&self.suite_slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let mut channel = self.connection.virtual_channel();
        debug!(browser = %self.identity, suite = %id, channel = %channel.id(), url = %url, "Loading suite");

        let handshake = async {
            self.connection.send_control(json!({
                "command": "loadSuite",
                "url": url.as_str(),
                "id": id,
                "channel": channel.id(),
            }))?;

            channel.send(json!({
                "type": "initial",
                "path": path.display().to_string(),
                "browser": self.identity.identifier(),
                "metadata": metadata,
                "extra": extra,
                "stackTraceMapper": mapper.as_ref().map(|m| m.serialize()),
            }))?;

            let reply = channel.recv().await.ok_or(Error::ConnectionClosed)?;
            check_reply(path, reply)
        };

        match handshake.await {
            Ok(initial) => {
                info!(browser = %self.identity, suite = %id, "Suite loaded");
                Ok(RunnerSuite::new(
                    id,
                    path.to_path_buf(),
                    channel,
                    self.connection.clone(),
                    initial,
                    mapper,
                    permit,
                ))
            }
            Err(e) => {
                debug!(suite = %id, error = %e, "Suite load failed");
                let _ = self
                    .connection
                    .send_control(json!({"command": "closeSuite", "id": id}));
                Err(e)
            }
        }
    }

    /// Shows the pause overlay and waits until the user resumes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the browser goes away first.
    pub async fn display_pause(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        *self.pause.lock() = Some(tx);

        self.connection
            .send_control(json!({"command": "displayPause"}))?;
        debug!(browser = %self.identity, "Paused");

        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the connection and the browser. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.suite_slots.close();
        self.pause.lock().take();
        self.connection.shutdown();
        self.browser.close().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Builds the host page URL for a manager socket at `socket_path`.
pub(crate) fn host_url(session_url: &Url, socket_path: &str, pause_after_load: bool) -> Result<Url> {
    let mut manager_url = session_url.join(socket_path)?;
    manager_url
        .set_scheme("ws")
        .map_err(|()| Error::config(format!("Cannot derive WebSocket URL from {session_url}")))?;

    let mut url = session_url.join(HOST_PAGE)?;
    url.query_pairs_mut()
        .append_pair("managerUrl", manager_url.as_str())
        .append_pair("debug", if pause_after_load { "true" } else { "false" });
    Ok(url)
}

/// Interprets the first message on a suite channel.
fn check_reply(path: &Path, reply: Value) -> Result<Value> {
    match reply.get("type").and_then(Value::as_str) {
        Some("success") => Ok(reply),
        Some("loadException") => {
            let message = reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("load exception");
            Err(Error::load(path, message))
        }
        Some("error") => {
            let message = reply
                .get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .map(|m| m.as_str().map(String::from).unwrap_or_else(|| m.to_string()))
                .unwrap_or_else(|| "unknown error".to_string());
            Err(Error::load(path, message))
        }
        _ => Err(Error::protocol(format!("Unexpected suite reply: {reply}"))),
    }
}

/// Handles control messages until the socket ends.
async fn run_control_loop(
    name: String,
    mut control_rx: mpsc::UnboundedReceiver<Value>,
    browser: Arc<dyn Browser>,
    closed: Arc<AtomicBool>,
    pause: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    suite_slots: Arc<Semaphore>,
) {
    while let Some(message) = control_rx.recv().await {
        match message.get("command").and_then(Value::as_str) {
            Some("ping") => {}
            Some("resume") => {
                if let Some(tx) = pause.lock().take() {
                    let _ = tx.send(());
                }
            }
            Some("restart") => info!(browser = %name, "Browser requested restart"),
            _ => warn!(browser = %name, message = %message, "Unknown control message"),
        }
    }

    debug!(browser = %name, "Control channel ended");
    closed.store(true, Ordering::SeqCst);
    suite_slots.close();
    pause.lock().take();
    if let Err(e) = browser.close().await {
        warn!(browser = %name, error = %e, "Failed to close browser");
    }
}

// ============================================================================
// Tests
// ============================================================================
