//! Server and suite configuration.
//!
//! [`ServerBuilder`] is the entry point: it collects a root directory, a
//! [`ServerConfig`] and the external collaborators, validates them and
//! starts a [`ServerSession`].
//!
//! # Example
//!
//! ```ignore
//! use browser_test_server::{CommandCompiler, ServerConfig, ServerSession};
//!
//! # async fn example() -> browser_test_server::Result<()> {
//! let session = ServerSession::builder()
//!     .root("./my_package")
//!     .config(ServerConfig::default().with_concurrency(4))
//!     .compiler(CommandCompiler::new("dart", ["compile", "js"]))
//!     .start()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::browser::{Backend, BrowserLauncher, ProcessLauncher};
use crate::compiler::Compiler;
use crate::error::{Error, Result};
use crate::session::ServerSession;

// ============================================================================
// Constants
// ============================================================================

/// Placeholder for the bootstrap script in HTML templates.
pub const TEST_SCRIPT_PLACEHOLDER: &str = "{{testScript}}";

/// Placeholder for the suite name in HTML templates.
pub const TEST_NAME_PLACEHOLDER: &str = "{{testName}}";

/// Default time a launched browser has to connect.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default suites loading concurrently in one browser.
const DEFAULT_SUITE_CONCURRENCY: usize = 8;

// ============================================================================
// ServerConfig
// ============================================================================

/// Session-wide settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent compiles.
    pub concurrency: usize,

    /// Pause each browser after a suite loads, for debugging.
    pub pause_after_load: bool,

    /// Base URL of an external build server.
    pub external_build_url: Option<Url>,

    /// HTML template used for generated wrapper pages.
    pub custom_html_template: Option<PathBuf>,

    /// Package name to package root URL, for stack trace rewriting.
    pub package_roots: FxHashMap<String, Url>,

    /// SDK root URL, for stack trace rewriting.
    pub sdk_root: Option<Url>,

    /// How long a launched browser has to connect.
    pub connect_timeout: Duration,

    /// Suites loading concurrently in one browser.
    pub suite_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            pause_after_load: false,
            external_build_url: None,
            custom_html_template: None,
            package_roots: FxHashMap::default(),
            sdk_root: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            suite_concurrency: DEFAULT_SUITE_CONCURRENCY,
        }
    }
}

impl ServerConfig {
    /// Sets the compile concurrency.
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Pauses browsers after each suite loads.
    #[inline]
    #[must_use]
    pub fn with_pause_after_load(mut self, pause: bool) -> Self {
        self.pause_after_load = pause;
        self
    }

    /// Uses an external build server at `url`.
    #[inline]
    #[must_use]
    pub fn with_external_build_url(mut self, url: Url) -> Self {
        self.external_build_url = Some(url);
        self
    }

    /// Uses a custom HTML template for wrapper pages.
    #[inline]
    #[must_use]
    pub fn with_custom_html_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_html_template = Some(path.into());
        self
    }

    /// Adds a package root.
    #[must_use]
    pub fn with_package_root(mut self, name: impl Into<String>, root: Url) -> Self {
        self.package_roots.insert(name.into(), root);
        self
    }

    /// Sets the SDK root.
    #[inline]
    #[must_use]
    pub fn with_sdk_root(mut self, root: Url) -> Self {
        self.sdk_root = Some(root);
        self
    }

    /// Sets the browser connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-browser suite concurrency.
    #[inline]
    #[must_use]
    pub fn with_suite_concurrency(mut self, concurrency: usize) -> Self {
        self.suite_concurrency = concurrency;
        self
    }
}

// ============================================================================
// SuiteConfig
// ============================================================================

/// Per-suite settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SuiteConfig {
    /// Requested backend; the browser default when `None`.
    pub backend: Option<Backend>,

    /// Report raw JavaScript stack traces instead of mapped ones.
    pub js_trace: bool,

    /// Directory holding precompiled suite output.
    pub precompiled_root: Option<PathBuf>,

    /// Load suites from the external build server.
    pub external_build: bool,

    /// Metadata forwarded to the browser.
    pub metadata: Value,
}

impl SuiteConfig {
    /// Resolves the backend for a browser defaulting to `default`.
    #[inline]
    #[must_use]
    pub fn backend_or(&self, default: Backend) -> Backend {
        self.backend.unwrap_or(default)
    }
}

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for a [`ServerSession`].
///
/// Use [`ServerSession::builder()`] to create one.
#[derive(Default)]
pub struct ServerBuilder {
    /// Directory suites and static files are served from.
    root: Option<PathBuf>,
    /// Session settings.
    config: ServerConfig,
    /// Compiler backend.
    compiler: Option<Arc<dyn Compiler>>,
    /// Browser launcher.
    launcher: Option<Arc<dyn BrowserLauncher>>,
}

impl ServerBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the root directory.
    #[inline]
    #[must_use]
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Replaces the session settings.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the compiler.
    #[must_use]
    pub fn compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Some(Arc::new(compiler));
        self
    }

    /// Sets a shared compiler.
    #[inline]
    #[must_use]
    pub fn compiler_arc(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Sets the browser launcher. Defaults to [`ProcessLauncher`].
    #[must_use]
    pub fn launcher(mut self, launcher: impl BrowserLauncher + 'static) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Sets a shared browser launcher.
    #[inline]
    #[must_use]
    pub fn launcher_arc(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Validates the configuration and starts the server.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the root, template or concurrency is invalid
    /// - [`Error::Io`] if the listener cannot be bound
    pub async fn start(self) -> Result<ServerSession> {
        let validated = self.validate()?;
        ServerSession::start(validated).await
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Builder output checked and ready to start.
pub(crate) struct ValidatedConfig {
    pub root: PathBuf,
    pub config: ServerConfig,
    pub template: Option<CustomTemplate>,
    pub compiler: Option<Arc<dyn Compiler>>,
    pub launcher: Arc<dyn BrowserLauncher>,
}

/// A loaded custom HTML template.
#[derive(Debug, Clone)]
pub(crate) struct CustomTemplate {
    /// Template file path.
    pub path: PathBuf,
    /// Template contents.
    pub contents: String,
}

impl ServerBuilder {
    fn validate(self) -> Result<ValidatedConfig> {
        let root = self.validate_root()?;
        let template = self.validate_template()?;

        if self.config.concurrency == 0 {
            return Err(Error::config("Compile concurrency must be at least 1."));
        }
        if self.config.suite_concurrency == 0 {
            return Err(Error::config("Suite concurrency must be at least 1."));
        }

        Ok(ValidatedConfig {
            root,
            config: self.config,
            template,
            compiler: self.compiler,
            launcher: self
                .launcher
                .unwrap_or_else(|| Arc::new(ProcessLauncher::new())),
        })
    }

    fn validate_root(&self) -> Result<PathBuf> {
        let root = self.root.clone().ok_or_else(|| {
            Error::config(
                "Root directory is required. Use .root() to set it.\n\
                 Example: ServerSession::builder().root(\"./my_package\")",
            )
        })?;

        if !root.is_dir() {
            return Err(Error::config(format!(
                "Root directory not found at: {}",
                root.display()
            )));
        }

        Ok(root)
    }

    fn validate_template(&self) -> Result<Option<CustomTemplate>> {
        let Some(path) = &self.config.custom_html_template else {
            return Ok(None);
        };

        let contents = read_template(path)?;
        if !contents.contains(TEST_SCRIPT_PLACEHOLDER) {
            return Err(Error::config(format!(
                "\"{}\" must contain {TEST_SCRIPT_PLACEHOLDER}.",
                path.display()
            )));
        }

        Ok(Some(CustomTemplate {
            path: path.clone(),
            contents,
        }))
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read HTML template \"{}\": {e}",
            path.display()
        ))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.concurrency >= 1);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.suite_concurrency, 8);
        assert!(config.external_build_url.is_none());
    }

    #[test]
    fn test_suite_config_deserializes() {
        let config: SuiteConfig = serde_json::from_value(serde_json::json!({
            "backend": "modular",
            "js_trace": true,
            "metadata": {"timeout": "30s"}
        }))
        .unwrap();

        assert_eq!(config.backend, Some(Backend::Modular));
        assert!(config.js_trace);
        assert!(!config.external_build);
        assert_eq!(config.metadata["timeout"], "30s");
        assert_eq!(config.backend_or(Backend::Bundle), Backend::Modular);
    }

    #[test]
    fn test_validate_requires_root() {
        let err = ServerBuilder::new().validate().err().expect("missing root");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("Root directory"));
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let err = ServerBuilder::new()
            .root("/nonexistent/root")
            .validate()
            .err()
            .expect("missing dir");
        assert!(err.is_config_error());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let dir = TempDir::new().unwrap();
        let err = ServerBuilder::new()
            .root(dir.path())
            .config(ServerConfig::default().with_concurrency(0))
            .validate()
            .err()
            .expect("zero concurrency");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_validate_template_placeholder() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.html");
        std::fs::write(&bad, "<html></html>").unwrap();

        let err = ServerBuilder::new()
            .root(dir.path())
            .config(ServerConfig::default().with_custom_html_template(&bad))
            .validate()
            .err()
            .expect("no placeholder");
        assert!(err.to_string().contains(TEST_SCRIPT_PLACEHOLDER));

        let good = dir.path().join("good.html");
        std::fs::write(&good, "<html>{{testScript}}</html>").unwrap();
        let validated = ServerBuilder::new()
            .root(dir.path())
            .config(ServerConfig::default().with_custom_html_template(&good))
            .validate()
            .expect("valid");
        assert!(validated.template.is_some());
    }
}
