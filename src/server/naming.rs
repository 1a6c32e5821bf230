//! URL paths of served suite files.
//!
//! For a suite at `test/foo_test.dart`:
//!
//! | Path | Content |
//! |------|---------|
//! | `test/foo_test.html` | Wrapper page |
//! | `test/foo_test.dart.browser_test.dart` | Bootstrap entrypoint |
//! | `test/foo_test.dart.browser_test.dart.js` (+ `.map`) | Single bundle |
//! | `test/foo_test.dart.browser_test.dart.module.js` (+ `.errors`) | Suite module |
//! | `test/foo_test.dart.browser_test.dart.modular.js` | Module loader |

// ============================================================================
// Imports
// ============================================================================

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Shared runtime module for the modular backend.
pub const RUNTIME_MODULE: &str = "__runtime__/runtime.module.js";

/// Page-side bootstrap script every suite page must load.
pub const PAGE_BOOTSTRAP: &str = "packages/test/bootstrap.js";

/// Host page the browser is pointed at.
pub const HOST_PAGE: &str = "packages/test/src/runner/browser/static/index.html";

/// Script of the host page.
pub const HOST_SCRIPT: &str = "packages/test/src/runner/browser/static/host.js";

/// Favicon, served outside the secret prefix.
pub const FAVICON: &str = "/favicon.ico";

// ============================================================================
// SuitePaths
// ============================================================================

/// Served paths for one suite, relative to the session root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SuitePaths {
    /// Suite path with `/` separators.
    rel: String,
    /// `rel` without its extension.
    prefix: String,
    /// Suite extension.
    ext: String,
}

impl SuitePaths {
    /// Derives paths for the suite at `rel`, relative to the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `rel` is absolute, escapes the root or
    /// has no extension.
    pub fn new(rel: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(Error::config(format!(
                        "Suite path \"{}\" must be relative to the root",
                        rel.display()
                    )));
                }
            }
        }
        let rel_str = parts.join("/");

        let ext = rel
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::config(format!("Suite path \"{}\" has no extension", rel.display()))
            })?;
        let prefix = rel_str
            .strip_suffix(&format!(".{ext}"))
            .unwrap_or(&rel_str)
            .to_string();

        Ok(Self {
            rel: rel_str,
            prefix,
            ext,
        })
    }

    /// Returns the suite path.
    #[inline]
    #[must_use]
    pub fn rel(&self) -> &str {
        &self.rel
    }

    /// Returns the suite path without extension.
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the suite extension.
    #[inline]
    #[must_use]
    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Returns the suite file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        basename(&self.rel)
    }

    /// Returns the suite name shown in page titles.
    #[must_use]
    pub fn name(&self) -> &str {
        basename(&self.prefix)
    }

    /// Returns the wrapper page path.
    #[must_use]
    pub fn html(&self) -> String {
        format!("{}.html", self.prefix)
    }

    /// Returns the bootstrap entrypoint path.
    #[must_use]
    pub fn bootstrap(&self) -> String {
        format!("{}.browser_test.{}", self.rel, self.ext)
    }

    /// Returns the single bundle path.
    #[must_use]
    pub fn bundle(&self) -> String {
        format!("{}.js", self.bootstrap())
    }

    /// Returns the bundle source map path.
    #[must_use]
    pub fn bundle_map(&self) -> String {
        format!("{}.js.map", self.bootstrap())
    }

    /// Returns the suite module path.
    #[must_use]
    pub fn module(&self) -> String {
        format!("{}.module.js", self.bootstrap())
    }

    /// Returns the suite module error report path.
    #[must_use]
    pub fn module_errors(&self) -> String {
        format!("{}.module.js.errors", self.bootstrap())
    }

    /// Returns the module loader script path.
    #[must_use]
    pub fn loader(&self) -> String {
        format!("{}.modular.js", self.bootstrap())
    }

    /// Returns the fixture page location under `root`.
    #[must_use]
    pub fn fixture(&self, root: &Path) -> PathBuf {
        root.join(self.html())
    }
}

/// Returns the last `/`-separated segment.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_for_suite() {
        let paths = SuitePaths::new(Path::new("test/foo_test.dart")).unwrap();

        assert_eq!(paths.prefix(), "test/foo_test");
        assert_eq!(paths.html(), "test/foo_test.html");
        assert_eq!(paths.bootstrap(), "test/foo_test.dart.browser_test.dart");
        assert_eq!(paths.bundle(), "test/foo_test.dart.browser_test.dart.js");
        assert_eq!(paths.bundle_map(), "test/foo_test.dart.browser_test.dart.js.map");
        assert_eq!(paths.module(), "test/foo_test.dart.browser_test.dart.module.js");
        assert_eq!(paths.loader(), "test/foo_test.dart.browser_test.dart.modular.js");
        assert_eq!(paths.file_name(), "foo_test.dart");
        assert_eq!(paths.name(), "foo_test");
    }

    #[test]
    fn test_rejects_bad_paths() {
        assert!(SuitePaths::new(Path::new("/abs/foo.dart")).is_err());
        assert!(SuitePaths::new(Path::new("../foo.dart")).is_err());
        assert!(SuitePaths::new(Path::new("test/noext")).is_err());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("a/b/c.js"), "c.js");
        assert_eq!(basename("c.js"), "c.js");
    }
}
