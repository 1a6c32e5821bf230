//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Secret`] | URL-safe session token prefixing every served path |
//! | [`SocketId`] | One-shot WebSocket upgrade path token |
//! | [`ChannelId`] | Virtual channel on a multiplexed connection |
//! | [`SuiteId`] | Suite loaded by a browser manager |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Secret
// ============================================================================

/// Opaque URL-safe token generated once per session.
///
/// Every request must carry it as the first path segment. This is a local
/// multi-user boundary, not a cryptographic credential.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret(String);

impl Secret {
    /// Generates a fresh random secret.
    #[must_use]
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Returns the secret as a path segment.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SocketId
// ============================================================================

/// Global counter for socket path tokens.
static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Token naming a one-shot WebSocket upgrade path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

impl SocketId {
    /// Allocates the next socket ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Parses a socket ID from a path segment.
    #[must_use]
    pub fn parse(segment: &str) -> Option<Self> {
        segment.parse().ok().map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ChannelId
// ============================================================================

/// Virtual channel ID on a multiplexed connection.
///
/// Channel `0` is the control channel. Locally created channels are odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    /// The control channel.
    pub const CONTROL: Self = Self(0);

    /// Creates a channel ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns `true` for the control channel.
    #[inline]
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SuiteId
// ============================================================================

/// Suite number assigned by a browser manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuiteId(u64);

impl SuiteId {
    /// Creates a suite ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
