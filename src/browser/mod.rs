//! Browsers and their managers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BrowserIdentity`] | A target browser kind and the backends it runs |
//! | [`ExecutableSettings`] | Per-identity launch overrides |
//! | [`BrowserLauncher`] | Starts a browser on a host URL |
//! | [`BrowserManager`] | A running browser and its control connection |
//! | [`ManagerRegistry`] | One lazily launched manager per identity |
//! | [`RunnerSuite`] | Channel to a suite loaded in a browser |

// ============================================================================
// Submodules
// ============================================================================

/// Browser identities and compiler backends.
pub mod identity;

/// Launch collaborator traits and the process launcher.
pub mod launcher;

/// Running browser manager.
pub mod manager;

/// Manager cache.
pub mod registry;

/// Executable settings.
pub mod settings;

/// Loaded suite handle.
pub mod suite;

// ============================================================================
// Re-exports
// ============================================================================

pub use identity::{Backend, BrowserIdentity, Execution};
pub use launcher::{Browser, BrowserLauncher, ProcessBrowser, ProcessLauncher};
pub use manager::{BrowserManager, ManagerOptions};
pub use registry::ManagerRegistry;
pub use settings::{ExecutableSettings, SettingsRegistry};
pub use suite::RunnerSuite;
