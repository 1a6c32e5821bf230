//! Per-browser executable settings.
//!
//! Settings come from user configuration and override how a browser is
//! launched. Settings applied later for the same identity merge into the
//! earlier ones: arguments accumulate and every other field is replaced only
//! when the newer settings set it.
//!
//! # Example
//!
//! ```ignore
//! use browser_test_server::{BrowserIdentity, ExecutableSettings};
//!
//! let settings = ExecutableSettings::new()
//!     .with_executable("/opt/firefox/firefox")
//!     .with_args(["--no-remote"]);
//!
//! session.customize(&BrowserIdentity::firefox(), settings);
//! ```

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::debug;

use super::BrowserIdentity;

// ============================================================================
// ExecutableSettings
// ============================================================================

/// Launch overrides for one browser identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ExecutableSettings {
    /// Extra command-line arguments.
    pub arguments: Vec<String>,

    /// Executable used on Linux.
    pub linux_executable: Option<String>,

    /// Executable used on macOS.
    pub mac_os_executable: Option<String>,

    /// Executable used on Windows.
    pub windows_executable: Option<String>,

    /// Whether to run headless; `None` keeps the browser default.
    pub headless: Option<bool>,
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ExecutableSettings {
    /// Creates empty settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the executable for every operating system.
    #[must_use]
    pub fn with_executable(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.linux_executable = Some(path.clone());
        self.mac_os_executable = Some(path.clone());
        self.windows_executable = Some(path);
        self
    }

    /// Adds command-line arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets headless mode.
    #[inline]
    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }
}

// ============================================================================
// Merging
// ============================================================================

impl ExecutableSettings {
    /// Merges `newer` into these settings.
    ///
    /// Arguments are appended; other fields are replaced only when set in `newer`.
    #[must_use]
    pub fn merge(&self, newer: &ExecutableSettings) -> Self {
        let mut arguments = self.arguments.clone();
        arguments.extend(newer.arguments.iter().cloned());

        Self {
            arguments,
            linux_executable: newer
                .linux_executable
                .clone()
                .or_else(|| self.linux_executable.clone()),
            mac_os_executable: newer
                .mac_os_executable
                .clone()
                .or_else(|| self.mac_os_executable.clone()),
            windows_executable: newer
                .windows_executable
                .clone()
                .or_else(|| self.windows_executable.clone()),
            headless: newer.headless.or(self.headless),
        }
    }

    /// Returns the executable for the current operating system.
    #[must_use]
    pub fn executable(&self) -> Option<&str> {
        let executable = if cfg!(target_os = "windows") {
            &self.windows_executable
        } else if cfg!(target_os = "macos") {
            &self.mac_os_executable
        } else {
            &self.linux_executable
        };
        executable.as_deref()
    }
}

// ============================================================================
// SettingsRegistry
// ============================================================================

/// Settings keyed by browser identifier.
#[derive(Debug, Default)]
pub struct SettingsRegistry {
    settings: RwLock<FxHashMap<String, ExecutableSettings>>,
}

impl SettingsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies settings for `identity`, merging with any already present.
    ///
    /// The first settings for a variant merge over its root family's.
    pub fn customize(&self, identity: &BrowserIdentity, settings: ExecutableSettings) {
        let mut map = self.settings.write();
        let base = map
            .get(identity.identifier())
            .or_else(|| map.get(identity.root().identifier()));
        let merged = match base {
            Some(existing) => existing.merge(&settings),
            None => settings,
        };
        debug!(browser = %identity.identifier(), ?merged, "Executable settings applied");
        map.insert(identity.identifier().to_string(), merged);
    }

    /// Resolves settings for `identity`, falling back to its root family.
    #[must_use]
    pub fn resolve(&self, identity: &BrowserIdentity) -> Option<ExecutableSettings> {
        let map = self.settings.read();
        map.get(identity.identifier())
            .or_else(|| map.get(identity.root().identifier()))
            .cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================
