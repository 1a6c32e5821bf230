//! WebSocket transport layer.
//!
//! This module handles communication between the server (Rust) and the
//! browser host page via WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │ BrowserManager  │                              │  Host page      │
//! │                 │         WebSocket            │  (index.html)   │
//! │  SocketHandler  │◄────────────────────────────►│                 │
//! │  → Connection   │   /<secret>/socket/<id>      │  suite iframes  │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `SocketHandler::create` - Allocate a one-shot upgrade path
//! 2. Launch the browser pointed at the host page with that path
//! 3. `PendingSocket::accept` - Wait for the host page to connect
//! 4. `Connection` - Control messages plus one virtual channel per suite
//! 5. `Connection::shutdown` - Close the socket when the manager closes
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Multiplexed connection and event loop |
//! | `socket` | One-shot upgrade paths |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexed WebSocket connection and event loop.
pub mod connection;

/// One-shot WebSocket upgrade paths.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, VirtualChannel};
pub use socket::{BrowserSocket, PendingSocket, SocketHandler};
