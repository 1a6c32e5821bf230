//! Error types for the browser test server.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_test_server::{Result, ServerSession};
//!
//! async fn example(session: &ServerSession) -> Result<()> {
//!     let suite = session.load("test/foo_test.js", &chrome, &config, json!(null)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::UnsupportedBackend`], [`Error::NotABrowser`] |
//! | Load | [`Error::LoadFailure`] |
//! | Launch | [`Error::LaunchFailed`], [`Error::ConnectionTimeout`] |
//! | Compile | [`Error::Compile`], [`Error::PoolClosed`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Protocol`] |
//! | Stack traces | [`Error::SourceMap`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::browser::Backend;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when server or suite configuration is invalid. Never retried.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// The requested backend cannot run in the requested browser.
    #[error("The {backend} backend is not supported by {browser}")]
    UnsupportedBackend {
        /// Requested backend.
        backend: Backend,
        /// Browser display name.
        browser: String,
    },

    /// The identity does not describe a browser.
    #[error("{identifier} is not a browser")]
    NotABrowser {
        /// Identifier of the rejected identity.
        identifier: String,
    },

    // ========================================================================
    // Load Errors
    // ========================================================================
    /// A suite failed to load.
    ///
    /// Per-suite; does not invalidate the session.
    #[error("Failed to load \"{}\": {message}", path.display())]
    LoadFailure {
        /// Suite source path.
        path: PathBuf,
        /// Description naming the offending file or URL.
        message: String,
    },

    // ========================================================================
    // Launch Errors
    // ========================================================================
    /// Browser process failed to start or exited before connecting.
    #[error("Failed to launch {browser}: {message}")]
    LaunchFailed {
        /// Browser display name.
        browser: String,
        /// Description of the launch failure.
        message: String,
    },

    /// Timed out waiting for the browser to connect.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Compile Errors
    // ========================================================================
    /// Compiler reported a failure.
    #[error("Failed to compile \"{}\": {message}", path.display())]
    Compile {
        /// Suite source path.
        path: PathBuf,
        /// Compiler diagnostic output.
        message: String,
    },

    /// The compiler pool has been closed.
    #[error("Compiler pool closed")]
    PoolClosed,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Stack Trace Errors
    // ========================================================================
    /// Source map could not be parsed.
    #[error("Invalid source map: {message}")]
    SourceMap {
        /// Description of the parse failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Outbound HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] JoinError),

    /// Error shared between several waiters of the same task.
    #[error(transparent)]
    Shared(Arc<Error>),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a load failure for a suite.
    #[inline]
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LoadFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a launch failure.
    #[inline]
    pub fn launch_failed(browser: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            browser: browser.into(),
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a compile error.
    #[inline]
    pub fn compile(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Compile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a source map error.
    #[inline]
    pub fn source_map(message: impl Into<String>) -> Self {
        Self::SourceMap {
            message: message.into(),
        }
    }

    /// Unwraps a shared error, returning the original when this is the last reference.
    #[must_use]
    pub fn from_shared(shared: Arc<Error>) -> Self {
        match Arc::try_unwrap(shared) {
            Ok(error) => error,
            Err(shared) => Self::Shared(shared),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the underlying error, looking through [`Error::Shared`].
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self.root(),
            Self::Config { .. } | Self::UnsupportedBackend { .. } | Self::NotABrowser { .. }
        )
    }

    /// Returns `true` if this is a per-suite load failure.
    #[inline]
    #[must_use]
    pub fn is_load_failure(&self) -> bool {
        matches!(self.root(), Self::LoadFailure { .. })
    }

    /// Returns `true` if this is a browser launch failure.
    #[inline]
    #[must_use]
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self.root(),
            Self::LaunchFailed { .. } | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.root(),
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_load_failure_names_path() {
        let err = Error::load("test/foo.html", "missing bootstrap script");
        assert_eq!(
            err.to_string(),
            "Failed to load \"test/foo.html\": missing bootstrap script"
        );
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_unsupported_backend_display() {
        let err = Error::UnsupportedBackend {
            backend: Backend::Modular,
            browser: "Safari".into(),
        };
        assert_eq!(
            err.to_string(),
            "The modular backend is not supported by Safari"
        );
        assert!(err.is_config_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::connection_timeout(1000).is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_from_shared_unwraps_last_reference() {
        let shared = Arc::new(Error::config("boom"));
        let err = Error::from_shared(shared);
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_shared_keeps_wrapper_when_shared() {
        let shared = Arc::new(Error::compile("a.js", "syntax error"));
        let other = Arc::clone(&shared);
        let err = Error::from_shared(shared);

        assert!(matches!(err, Error::Shared(_)));
        assert!(matches!(err.root(), Error::Compile { .. }));
        assert_eq!(err.to_string(), other.to_string());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
