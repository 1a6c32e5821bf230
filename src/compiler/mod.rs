//! Compilation of suites into browser-loadable output.
//!
//! The actual compiler is an external collaborator behind the [`Compiler`]
//! trait. [`CompilerPool`] bounds how many compiles run at once, runs each
//! suite path at most once per session and publishes the output to the
//! server's dynamic file table.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Compiler`] | Compiles one entrypoint |
//! | [`CommandCompiler`] | Runs an external compiler executable |
//! | [`CompilerPool`] | Bounded single-flight pool |

// ============================================================================
// Submodules
// ============================================================================

/// External compiler process.
pub mod command;

/// Bounded single-flight pool.
pub mod pool;

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::browser::Backend;
use crate::error::{Error, Result};
use crate::server::assets;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::CommandCompiler;
pub use pool::{CompileJob, CompilerPool};

// ============================================================================
// CompileRequest
// ============================================================================

/// One compile handed to a [`Compiler`].
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Suite path relative to the root, for diagnostics.
    pub suite: PathBuf,
    /// Backend to compile for.
    pub backend: Backend,
    /// Where the bootstrap entrypoint should be written.
    pub entrypoint: PathBuf,
    /// Bootstrap entrypoint source importing the suite.
    pub entrypoint_source: String,
    /// Output file. A source map is expected at `<output>.map`.
    pub output: PathBuf,
}

// ============================================================================
// Compiler
// ============================================================================

/// Compiles suites.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compiles `request.entrypoint` into `request.output`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compile`] carrying the compiler's diagnostic.
    async fn compile(&self, request: &CompileRequest) -> Result<()>;

    /// Compiles the shared runtime module used by the modular backend.
    ///
    /// # Errors
    ///
    /// The default implementation fails with [`Error::Config`].
    async fn compile_runtime(&self, output: &Path) -> Result<()> {
        let _ = output;
        Err(Error::config(
            "This compiler does not support the modular backend.",
        ))
    }

    /// Returns the bootstrap entrypoint source importing `import`.
    fn bootstrap_source(&self, import: &str) -> String {
        assets::suite_bootstrap(import)
    }

    /// Stops any running compiles.
    async fn close(&self) {}
}

/// Appends `suffix` to the file name of `path`.
#[must_use]
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    #[async_trait]
    impl Compiler for Minimal {
        async fn compile(&self, _request: &CompileRequest) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runtime_unsupported_by_default() {
        let err = Minimal
            .compile_runtime(Path::new("runtime.js"))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_default_bootstrap_source() {
        assert!(Minimal.bootstrap_source("./a.dart").contains("\"./a.dart\""));
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("/tmp/a.js"), ".map"),
            PathBuf::from("/tmp/a.js.map")
        );
    }
}
