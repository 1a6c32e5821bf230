//! A suite loaded in a browser.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::SuiteId;
use crate::stack_trace::StackTraceMapper;
use crate::transport::{Connection, VirtualChannel};

// ============================================================================
// RunnerSuite
// ============================================================================

/// Communication channel to one suite running in a browser.
///
/// Holds one of the manager's load slots until closed or dropped.
pub struct RunnerSuite {
    id: SuiteId,
    path: PathBuf,
    channel: VirtualChannel,
    connection: Connection,
    initial: Value,
    mapper: Option<Arc<StackTraceMapper>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl RunnerSuite {
    pub(crate) fn new(
        id: SuiteId,
        path: PathBuf,
        channel: VirtualChannel,
        connection: Connection,
        initial: Value,
        mapper: Option<Arc<StackTraceMapper>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            id,
            path,
            channel,
            connection,
            initial,
            mapper,
            permit: Some(permit),
        }
    }

    /// Returns the suite ID within its browser.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SuiteId {
        self.id
    }

    /// Returns the suite source path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the browser's first reply, describing the loaded suite.
    #[inline]
    #[must_use]
    pub fn initial(&self) -> &Value {
        &self.initial
    }

    /// Returns the stack trace mapper for this suite, if any.
    #[inline]
    #[must_use]
    pub fn mapper(&self) -> Option<&Arc<StackTraceMapper>> {
        self.mapper.as_ref()
    }

    /// Sends a message to the suite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the browser disconnected.
    pub fn send(&self, message: Value) -> Result<()> {
        self.channel.send(message)
    }

    /// Receives the next message, or `None` once the suite channel closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.channel.recv().await
    }

    /// Unloads the suite from the browser. Safe to call more than once.
    pub fn close(&mut self) {
        if self.permit.take().is_some() {
            debug!(suite = %self.id, "Closing suite");
            let _ = self
                .connection
                .send_control(json!({"command": "closeSuite", "id": self.id}));
            self.channel.close();
        }
    }
}

impl Drop for RunnerSuite {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RunnerSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSuite")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("channel", &self.channel.id())
            .finish_non_exhaustive()
    }
}
