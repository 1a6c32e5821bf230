//! Files generated per request.
//!
//! Wrapper pages, bootstrap entrypoints and module loaders are produced from
//! the registered suites; the host page and page bootstrap are fixed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use hyper::Request;
use hyper::body::Incoming;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::browser::Backend;
use crate::compiler::Compiler;
use crate::identifiers::Secret;

use super::assets;
use super::cascade::Handler;
use super::naming::{
    HOST_PAGE, HOST_SCRIPT, PAGE_BOOTSTRAP, RUNTIME_MODULE, SuitePaths, basename,
};
use super::response::{self, HttpResponse};

// ============================================================================
// Types
// ============================================================================

/// What a registered path generates.
#[derive(Debug, Clone)]
enum Generated {
    /// Wrapper page for the suite.
    Wrapper(SuitePaths),
    /// Bootstrap entrypoint importing the suite.
    Bootstrap(SuitePaths),
    /// Module loader for the modular backend.
    Loader(SuitePaths),
}

// ============================================================================
// SyntheticFiles
// ============================================================================

/// Generates suite pages and scripts.
pub struct SyntheticFiles {
    /// Session secret, for absolute URLs.
    secret: Secret,
    /// Custom wrapper template contents.
    template: Option<String>,
    /// Compiler providing the bootstrap entrypoint source.
    compiler: Option<Arc<dyn Compiler>>,
    /// Generated paths of registered suites.
    paths: RwLock<FxHashMap<String, Generated>>,
}

impl SyntheticFiles {
    /// Creates a handler with no suites registered.
    #[must_use]
    pub fn new(
        secret: Secret,
        template: Option<String>,
        compiler: Option<Arc<dyn Compiler>>,
    ) -> Self {
        Self {
            secret,
            template,
            compiler,
            paths: RwLock::new(FxHashMap::default()),
        }
    }

    /// Registers the generated files of a suite.
    pub fn register_suite(&self, suite: &SuitePaths) {
        let mut paths = self.paths.write();
        paths.insert(suite.html(), Generated::Wrapper(suite.clone()));
        paths.insert(suite.bootstrap(), Generated::Bootstrap(suite.clone()));
        paths.insert(suite.loader(), Generated::Loader(suite.clone()));
    }

    /// Returns the bootstrap entrypoint source of a suite.
    #[must_use]
    pub fn bootstrap_source(&self, suite: &SuitePaths) -> String {
        let import = format!("./{}", suite.file_name());
        match &self.compiler {
            Some(compiler) => compiler.bootstrap_source(&import),
            None => assets::suite_bootstrap(&import),
        }
    }

    /// Returns the wrapper page of a suite loaded with `backend`.
    #[must_use]
    pub fn wrapper_page(&self, suite: &SuitePaths, backend: Backend) -> String {
        let script = assets::test_script(backend, &suite.bootstrap());
        assets::wrapper_html(self.template.as_deref(), suite.name(), &script)
    }

    /// Returns the module loader script of a suite.
    #[must_use]
    pub fn loader_script(&self, suite: &SuitePaths) -> String {
        let runtime = format!("/{}/{RUNTIME_MODULE}", self.secret);
        let module = suite.module();
        let errors = suite.module_errors();
        assets::modular_loader(&runtime, basename(&module), basename(&errors))
    }
}

#[async_trait]
impl Handler for SyntheticFiles {
    async fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        if path == HOST_PAGE {
            return Some(response::ok("text/html; charset=utf-8", assets::HOST_HTML));
        }
        if path == HOST_SCRIPT {
            return Some(response::ok("application/javascript", assets::HOST_JS));
        }
        if path.ends_with(PAGE_BOOTSTRAP) {
            return Some(response::ok("application/javascript", assets::PAGE_BOOTSTRAP_JS));
        }

        let generated = self.paths.read().get(path).cloned()?;
        trace!(path = %path, "Serving generated file");

        Some(match generated {
            Generated::Wrapper(suite) => {
                let backend = requested_backend(request).unwrap_or(Backend::Bundle);
                response::ok("text/html; charset=utf-8", self.wrapper_page(&suite, backend))
            }
            Generated::Bootstrap(suite) => {
                response::ok(&response::content_type_for(path), self.bootstrap_source(&suite))
            }
            Generated::Loader(suite) => {
                response::ok("application/javascript", self.loader_script(&suite))
            }
        })
    }
}

/// Reads the `mode` query parameter.
fn requested_backend(request: &Request<Incoming>) -> Option<Backend> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "mode")
        .and_then(|(_, value)| Backend::from_page_mode(&value))
}

// ============================================================================
// Tests
// ============================================================================
