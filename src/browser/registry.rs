//! One lazily started manager per browser identity.
//!
//! The first request for an identity launches its browser; concurrent
//! requests attach to the same launch. A failed launch is remembered for the
//! rest of the session and later requests report the browser as unavailable
//! without launching again.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::memo::TaskMap;
use crate::transport::SocketHandler;

use super::launcher::BrowserLauncher;
use super::manager::{BrowserManager, ManagerOptions};
use super::{BrowserIdentity, SettingsRegistry};

// ============================================================================
// Types
// ============================================================================

/// A launched manager, or `None` if the session closed during launch.
type ManagerSlot = Option<Arc<BrowserManager>>;

/// Everything a launch task needs, shared with spawned launches.
struct LaunchContext {
    launcher: Arc<dyn BrowserLauncher>,
    settings: Arc<SettingsRegistry>,
    sockets: Arc<SocketHandler>,
    session_url: Url,
    options: ManagerOptions,
    closed: AtomicBool,
}

// ============================================================================
// ManagerRegistry
// ============================================================================

/// Cache of browser managers keyed by identity.
pub struct ManagerRegistry {
    context: Arc<LaunchContext>,
    managers: TaskMap<String, ManagerSlot>,
    /// Bumped by every [`close_all`](Self::close_all).
    generation: AtomicU64,
}

impl ManagerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        settings: Arc<SettingsRegistry>,
        sockets: Arc<SocketHandler>,
        session_url: Url,
        options: ManagerOptions,
    ) -> Self {
        Self {
            context: Arc::new(LaunchContext {
                launcher,
                settings,
                sockets,
                session_url,
                options,
                closed: AtomicBool::new(false),
            }),
            managers: TaskMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the manager for `identity`, launching it on first use.
    ///
    /// Returns `Ok(None)` once the registry is closed or when an earlier
    /// launch for this identity failed.
    ///
    /// # Errors
    ///
    /// The call that started a launch receives the launch error.
    pub async fn manager_for(&self, identity: &BrowserIdentity) -> Result<Option<Arc<BrowserManager>>> {
        if self.is_closed() {
            return Ok(None);
        }

        let context = Arc::clone(&self.context);
        let launch_identity = identity.clone();
        let (task, started) = self
            .managers
            .get_or_start(identity.identifier().to_string(), move || {
                launch(context, launch_identity)
            });

        match task.await {
            Ok(manager) => Ok(manager.filter(|m| !m.is_closed())),
            Err(e) if started => Err(Error::from_shared(e)),
            Err(e) => {
                debug!(browser = %identity, error = %e, "Browser previously failed to launch");
                Ok(None)
            }
        }
    }

    /// Closes every launched manager.
    ///
    /// The registry stays usable: later requests launch fresh browsers.
    pub async fn close_all(&self) {
        let tasks = self.managers.drain();
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(count = tasks.len(), "Closing browser managers");

        let closes = tasks.into_iter().map(|task| async move {
            if let Ok(Some(manager)) = task.await
                && let Err(e) = manager.close().await
            {
                warn!(browser = %manager.identity(), error = %e, "Failed to close browser");
            }
        });
        futures_util::future::join_all(closes).await;
    }

    /// Closes every manager and refuses further launches.
    pub async fn close(&self) {
        self.context.closed.store(true, Ordering::SeqCst);
        self.close_all().await;
    }

    /// Returns the number of [`close_all`](Self::close_all) calls so far.
    ///
    /// A load that reads a different value after awaiting a manager raced
    /// an ephemeral close.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.context.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of identities with a launch started.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Returns `true` if nothing has been launched.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

/// Launches one browser for the registry.
async fn launch(context: Arc<LaunchContext>, identity: BrowserIdentity) -> Result<ManagerSlot> {
    if context.closed.load(Ordering::SeqCst) {
        debug!(browser = %identity, "Registry closed before launch");
        return Ok(None);
    }

    let settings = context.settings.resolve(&identity);
    let manager = BrowserManager::start(
        identity,
        context.launcher.as_ref(),
        settings,
        &context.sockets,
        &context.session_url,
        &context.options,
    )
    .await?;

    if context.closed.load(Ordering::SeqCst) {
        debug!(browser = %manager.identity(), "Registry closed during launch");
        manager.close().await?;
        return Ok(None);
    }

    Ok(Some(Arc::new(manager)))
}

// ============================================================================
// Tests
// ============================================================================
