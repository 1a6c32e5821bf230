//! Browser test server - runs test suites inside real browsers.
//!
//! This library serves compiled test suites to browsers over a secret-scoped
//! HTTP server and hands each loaded suite back to the caller as a message
//! channel.
//!
//! # Architecture
//!
//! - **Routing**: one loopback HTTP server; every path sits under a random
//!   secret segment and is answered by a cascade of handlers
//! - **Compilation**: a bounded pool compiles each suite path once per session
//! - **Browsers**: one lazily launched browser per identity, connected back
//!   over a multiplexed WebSocket
//! - **Stack traces**: compiled frames are mapped back to sources with the
//!   suite's source map
//!
//! # Quick Start
//!
//! ```no_run
//! use browser_test_server::{
//!     BrowserIdentity, CommandCompiler, Result, ServerSession, SuiteConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = ServerSession::builder()
//!         .root("./my_package")
//!         .compiler(CommandCompiler::new("dart", ["compile", "js"]))
//!         .start()
//!         .await?;
//!
//!     let chrome = BrowserIdentity::chrome();
//!     if let Some(mut suite) = session
//!         .load("test/foo_test.dart", &chrome, &SuiteConfig::default(), json!(null))
//!         .await?
//!     {
//!         while let Some(message) = suite.recv().await {
//!             println!("{message}");
//!         }
//!     }
//!
//!     session.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Identities, launching, managers, loaded suites |
//! | [`compiler`] | Compiler trait and pool |
//! | [`config`] | Server and suite configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`external`] | External build server client |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`memo`] | Single-flight task memoization |
//! | [`server`] | HTTP server and handlers |
//! | [`session`] | Session lifecycle and suite loading |
//! | [`stack_trace`] | Source map based stack trace mapping |
//! | [`transport`] | WebSocket transport layer (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Browser identities, launching and managers.
///
/// - [`BrowserIdentity`] - A target browser kind
/// - [`BrowserManager`](browser::BrowserManager) - A running browser
/// - [`RunnerSuite`] - A suite loaded in a browser
pub mod browser;

/// Compiler trait, external compiler and bounded pool.
pub mod compiler;

/// Server and suite configuration.
///
/// Use [`ServerSession::builder()`] to configure a session.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// External build server client.
pub mod external;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Single-flight task memoization.
pub mod memo;

/// HTTP server, routing and handlers.
pub mod server;

/// Session lifecycle and suite loading.
pub mod session;

/// Stack trace mapping.
pub mod stack_trace;

/// WebSocket transport layer.
///
/// Internal module handling upgrade paths and multiplexed connections.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Browser types
pub use browser::{
    Backend, Browser, BrowserIdentity, BrowserLauncher, ExecutableSettings, ProcessLauncher,
    RunnerSuite,
};

// Compiler types
pub use compiler::{CommandCompiler, CompileRequest, Compiler};

// Configuration types
pub use config::{ServerBuilder, ServerConfig, SuiteConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelId, Secret, SuiteId};

// Session
pub use session::ServerSession;

// Stack traces
pub use stack_trace::{Frame, MapperContext, StackTraceMapper};
