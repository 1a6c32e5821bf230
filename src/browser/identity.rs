//! Browser identities and compiler backends.
//!
//! A [`BrowserIdentity`] names a target browser kind and records how it runs
//! suites: either compiled to JavaScript or by executing the suite source
//! natively. Variants (for example a headless flavour) are derived with
//! [`BrowserIdentity::extend`] and keep a link to their root family.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Backend
// ============================================================================

/// Compiler strategy producing what a browser loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A single self-contained script.
    Bundle,
    /// An incrementally linked module loaded alongside a shared runtime module.
    Modular,
    /// The suite source itself, executed natively by the browser.
    Source,
}

impl Backend {
    /// Returns the backend name used in URLs and configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bundle => "bundle",
            Self::Modular => "modular",
            Self::Source => "source",
        }
    }

    /// Returns the `mode` query value the wrapper page understands.
    #[must_use]
    pub const fn page_mode(&self) -> &'static str {
        match self {
            Self::Bundle => "bundle",
            Self::Modular => "modular",
            Self::Source => "native",
        }
    }

    /// Parses a `mode` query value.
    #[must_use]
    pub fn from_page_mode(mode: &str) -> Option<Self> {
        match mode {
            "bundle" => Some(Self::Bundle),
            "modular" => Some(Self::Modular),
            "native" => Some(Self::Source),
            _ => None,
        }
    }

    /// Returns `true` if this backend needs the compiler.
    #[inline]
    #[must_use]
    pub const fn compiles(&self) -> bool {
        !matches!(self, Self::Source)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bundle" => Ok(Self::Bundle),
            "modular" => Ok(Self::Modular),
            "source" => Ok(Self::Source),
            other => Err(Error::config(format!("Unknown backend \"{other}\""))),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// How a browser runs a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Execution {
    /// Loads compiled JavaScript.
    CompiledJs,
    /// Executes the suite source directly.
    Native,
}

// ============================================================================
// BrowserIdentity
// ============================================================================

/// A target browser kind.
///
/// Equality and hashing use the identifier only.
#[derive(Debug, Clone)]
pub struct BrowserIdentity {
    /// Human-readable name, e.g. `"Firefox"`.
    name: String,
    /// Identifier used in configuration, e.g. `"firefox"`.
    identifier: String,
    /// Whether suites run compiled or natively.
    execution: Execution,
    /// Whether this identity is a browser at all.
    is_browser: bool,
    /// Whether the browser runs without a window.
    headless: bool,
    /// Default executable name used when no settings override it.
    command: Option<String>,
    /// Backends this browser can run.
    supported_backends: Vec<Backend>,
    /// Backend used when the suite does not request one.
    default_backend: Backend,
    /// Root family when this identity is a derived variant.
    parent: Option<Box<BrowserIdentity>>,
}

// ============================================================================
// BrowserIdentity - Constructors
// ============================================================================

impl BrowserIdentity {
    /// Creates a browser identity that runs compiled JavaScript.
    #[must_use]
    pub fn compiled(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            execution: Execution::CompiledJs,
            is_browser: true,
            headless: false,
            command: None,
            supported_backends: vec![Backend::Bundle, Backend::Modular],
            default_backend: Backend::Bundle,
            parent: None,
        }
    }

    /// Creates a browser identity that executes suite sources natively.
    #[must_use]
    pub fn native(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            execution: Execution::Native,
            supported_backends: vec![Backend::Source],
            default_backend: Backend::Source,
            ..Self::compiled(name, identifier)
        }
    }

    /// Google Chrome.
    #[must_use]
    pub fn chrome() -> Self {
        Self::compiled("Chrome", "chrome").with_command("google-chrome")
    }

    /// Mozilla Firefox.
    #[must_use]
    pub fn firefox() -> Self {
        Self::compiled("Firefox", "firefox").with_command("firefox")
    }

    /// Apple Safari. Runs single bundles only.
    #[must_use]
    pub fn safari() -> Self {
        Self::compiled("Safari", "safari")
            .with_command("safari")
            .with_backends(vec![Backend::Bundle], Backend::Bundle)
    }

    /// Microsoft Edge.
    #[must_use]
    pub fn edge() -> Self {
        Self::compiled("Microsoft Edge", "edge").with_command("msedge")
    }

    /// A standalone VM runtime; not a browser.
    #[must_use]
    pub fn vm() -> Self {
        Self {
            is_browser: false,
            ..Self::native("VM", "vm")
        }
    }

    /// Derives a variant of this identity whose root is this family.
    #[must_use]
    pub fn extend(&self, name: impl Into<String>, identifier: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.name = name.into();
        child.identifier = identifier.into();
        child.parent = Some(Box::new(self.root().clone()));
        child
    }

    /// Sets the default executable name.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Marks the identity as headless.
    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Replaces the supported backends.
    #[must_use]
    pub fn with_backends(mut self, supported: Vec<Backend>, default: Backend) -> Self {
        self.supported_backends = supported;
        self.default_backend = default;
        self
    }
}

// ============================================================================
// BrowserIdentity - Accessors
// ============================================================================

impl BrowserIdentity {
    /// Returns the display name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identifier.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns how this browser runs suites.
    #[inline]
    #[must_use]
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Returns `true` if suites are compiled to JavaScript for this browser.
    #[inline]
    #[must_use]
    pub fn is_js(&self) -> bool {
        self.execution == Execution::CompiledJs
    }

    /// Returns `true` if this identity is a browser.
    #[inline]
    #[must_use]
    pub fn is_browser(&self) -> bool {
        self.is_browser
    }

    /// Returns `true` if the browser runs headless.
    #[inline]
    #[must_use]
    pub fn is_headless(&self) -> bool {
        self.headless
    }

    /// Returns the default executable name.
    #[inline]
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Returns the backends this browser can run.
    #[inline]
    #[must_use]
    pub fn supported_backends(&self) -> &[Backend] {
        &self.supported_backends
    }

    /// Returns the backend used when none is requested.
    #[inline]
    #[must_use]
    pub fn default_backend(&self) -> Backend {
        self.default_backend
    }

    /// Returns `true` if this browser can run `backend`.
    #[inline]
    #[must_use]
    pub fn supports(&self, backend: Backend) -> bool {
        self.supported_backends.contains(&backend)
    }

    /// Returns the root family, or `self` if this is not a derived variant.
    #[must_use]
    pub fn root(&self) -> &BrowserIdentity {
        match &self.parent {
            Some(parent) => parent,
            None => self,
        }
    }

    /// Returns `true` if this identity is the root of its family.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl PartialEq for BrowserIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for BrowserIdentity {}

impl Hash for BrowserIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl fmt::Display for BrowserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_capabilities() {
        assert!(BrowserIdentity::chrome().is_js());
        assert!(BrowserIdentity::chrome().supports(Backend::Modular));
        assert!(!BrowserIdentity::safari().supports(Backend::Modular));
        assert!(!BrowserIdentity::vm().is_browser());
    }

    #[test]
    fn test_native_identity_runs_source() {
        let native = BrowserIdentity::native("Content Shell", "content-shell");
        assert!(!native.is_js());
        assert_eq!(native.default_backend(), Backend::Source);
        assert!(!native.supports(Backend::Bundle));
    }

    #[test]
    fn test_extend_links_root() {
        let firefox = BrowserIdentity::firefox();
        let headless = firefox
            .extend("Firefox Headless", "firefox-headless")
            .with_headless(true);
        let nested = headless.extend("Firefox Nightly Headless", "firefox-nightly-headless");

        assert!(!headless.is_root());
        assert_eq!(headless.root(), &firefox);
        assert_eq!(nested.root(), &firefox);
        assert!(headless.is_headless());
        assert_eq!(headless.command(), Some("firefox"));
    }

    #[test]
    fn test_equality_by_identifier() {
        let a = BrowserIdentity::compiled("A", "same");
        let b = BrowserIdentity::compiled("B", "same");
        assert_eq!(a, b);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(Backend::Modular.to_string(), "modular");
        assert_eq!("bundle".parse::<Backend>().unwrap(), Backend::Bundle);
        assert!("wasm".parse::<Backend>().is_err());
        assert_eq!(Backend::from_page_mode("native"), Some(Backend::Source));
        assert!(!Backend::Source.compiles());
    }
}
