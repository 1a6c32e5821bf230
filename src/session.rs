//! Server session: the root object of a test run.
//!
//! A [`ServerSession`] owns the HTTP server, the compiler pool, the browser
//! managers and every per-session cache. Suites are loaded with
//! [`ServerSession::load`], which resolves the suite's output, points a
//! browser at it and hands back the suite's channel.
//!
//! # Suite Load
//!
//! 1. Validate the browser, backend and fixture page
//! 2. Resolve output: external build server, precompiled root, or compile
//! 3. Resolve the suite URL
//! 4. Acquire the browser manager
//! 5. Hand the suite to the browser and await its first reply
//!
//! Closing the session is cooperative: a load that observes the session
//! closed after any await returns `Ok(None)` instead of continuing.
//!
//! # Example
//!
//! ```ignore
//! use browser_test_server::{BrowserIdentity, ServerSession, SuiteConfig};
//!
//! let session = ServerSession::builder().root("./pkg").start().await?;
//! let suite = session
//!     .load("test/foo_test.dart", &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
//!     .await?;
//! session.close().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{
    Backend, BrowserIdentity, ExecutableSettings, ManagerOptions, ManagerRegistry, RunnerSuite,
    SettingsRegistry,
};
use crate::compiler::{CompileJob, CompilerPool};
use crate::config::{CustomTemplate, ServerBuilder, ServerConfig, SuiteConfig, ValidatedConfig};
use crate::error::{Error, Result};
use crate::external::ExternalBuild;
use crate::identifiers::Secret;
use crate::memo::AsyncOnce;
use crate::server::naming::{PAGE_BOOTSTRAP, SuitePaths};
use crate::server::{
    Cascade, DynamicFiles, HttpServer, PrecompiledRoots, Router, StaticFiles, SyntheticFiles,
};
use crate::stack_trace::{MapperContext, StackTraceMapper, StackTraceMaps};
use crate::transport::SocketHandler;

// ============================================================================
// ServerSession
// ============================================================================

/// A running test server.
///
/// Cloning is cheap; clones share the session.
#[derive(Clone)]
pub struct ServerSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    root: PathBuf,
    secret: Secret,
    url: Url,
    config: ServerConfig,
    template: Option<CustomTemplate>,
    mapper_context: MapperContext,

    server: HttpServer,
    sockets: Arc<SocketHandler>,
    dynamic: Arc<DynamicFiles>,
    precompiled: Arc<PrecompiledRoots>,
    synthetic: Arc<SyntheticFiles>,
    maps: Arc<StackTraceMaps>,
    settings: Arc<SettingsRegistry>,
    registry: ManagerRegistry,
    pool: Option<CompilerPool>,
    external: Option<Arc<ExternalBuild>>,
    temp_dir: Mutex<Option<TempDir>>,

    closed: AtomicBool,
    close_once: AsyncOnce<()>,
}

impl ServerSession {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Starts a session from validated configuration.
    pub(crate) async fn start(validated: ValidatedConfig) -> Result<Self> {
        let ValidatedConfig {
            root,
            config,
            template,
            compiler,
            launcher,
        } = validated;

        let root = tokio::fs::canonicalize(&root).await?;
        let secret = Secret::generate();

        let sockets = Arc::new(SocketHandler::new());
        let dynamic = Arc::new(DynamicFiles::new());
        let precompiled = Arc::new(PrecompiledRoots::new());
        let synthetic = Arc::new(SyntheticFiles::new(
            secret.clone(),
            template.as_ref().map(|t| t.contents.clone()),
            compiler.clone(),
        ));
        let external = config
            .external_build_url
            .clone()
            .map(ExternalBuild::new)
            .transpose()?
            .map(Arc::new);

        let mut cascade = Cascade::new()
            .with(sockets.clone())
            .with(Arc::new(StaticFiles::new(root.clone())))
            .with(dynamic.clone())
            .with(precompiled.clone())
            .with(synthetic.clone());
        if let Some(external) = &external {
            cascade = cascade.with(external.clone());
        }

        let router = Arc::new(Router::new(secret.clone(), Arc::new(cascade)));
        let server = HttpServer::bind(router).await?;
        let url = Url::parse(&format!("http://127.0.0.1:{}/{secret}/", server.port()))?;

        let mapper_context = MapperContext {
            sdk_root: config.sdk_root.clone(),
            package_roots: config.package_roots.clone(),
        };
        let maps = Arc::new(StackTraceMaps::new());

        let (temp_dir, pool) = match compiler {
            Some(compiler) => {
                let dir = tempfile::Builder::new().prefix("browser_test_").tempdir()?;
                let pool = CompilerPool::new(
                    compiler,
                    config.concurrency,
                    dir.path(),
                    Arc::clone(&dynamic),
                    Arc::clone(&maps),
                    url.clone(),
                    mapper_context.clone(),
                );
                (Some(dir), Some(pool))
            }
            None => (None, None),
        };

        let settings = Arc::new(SettingsRegistry::new());
        let registry = ManagerRegistry::new(
            launcher,
            Arc::clone(&settings),
            Arc::clone(&sockets),
            url.clone(),
            ManagerOptions {
                pause_after_load: config.pause_after_load,
                connect_timeout: config.connect_timeout,
                suite_concurrency: config.suite_concurrency,
            },
        );

        info!(url = %url, root = %root.display(), "Server session started");

        Ok(Self {
            inner: Arc::new(SessionInner {
                root,
                secret,
                url,
                config,
                template,
                mapper_context,
                server,
                sockets,
                dynamic,
                precompiled,
                synthetic,
                maps,
                settings,
                registry,
                pool,
                external,
                temp_dir: Mutex::new(temp_dir),
                closed: AtomicBool::new(false),
                close_once: AsyncOnce::new(),
            }),
        })
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ServerSession {
    /// Returns the session URL, including the secret segment.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the session secret.
    #[inline]
    #[must_use]
    pub fn secret(&self) -> &Secret {
        &self.inner.secret
    }

    /// Returns the canonical root directory.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Returns the stack trace mapper loaded for a suite.
    #[must_use]
    pub fn mapper(&self, path: impl AsRef<Path>) -> Option<Arc<StackTraceMapper>> {
        self.inner.maps.get(path.as_ref())
    }

    /// Overrides executable settings for a browser.
    ///
    /// Settings merge into any earlier settings for the same identity.
    pub fn customize_browser(&self, identity: &BrowserIdentity, settings: ExecutableSettings) {
        self.inner.settings.customize(identity, settings);
    }
}

// ============================================================================
// Suite Loading
// ============================================================================

impl ServerSession {
    /// Loads the suite at `path` (relative to the root) in `identity`.
    ///
    /// Returns `Ok(None)` if the session closed during the load or the
    /// browser previously failed to launch.
    ///
    /// # Errors
    ///
    /// - [`Error::NotABrowser`], [`Error::UnsupportedBackend`], [`Error::Config`]
    ///   before any I/O
    /// - [`Error::LoadFailure`] for a bad fixture page or external build fetch
    /// - [`Error::Compile`] if compiling failed
    /// - [`Error::LaunchFailed`] to the load that launched a failing browser
    pub async fn load(
        &self,
        path: impl AsRef<Path>,
        identity: &BrowserIdentity,
        suite_config: &SuiteConfig,
        extra: Value,
    ) -> Result<Option<RunnerSuite>> {
        let inner = &self.inner;
        let path = path.as_ref();
        if inner.is_closed() {
            return Ok(None);
        }

        let backend = inner.validate(identity, suite_config)?;
        let paths = SuitePaths::new(path)?;
        inner.validate_fixture(path, &paths).await?;
        if inner.is_closed() {
            return Ok(None);
        }
        inner.synthetic.register_suite(&paths);

        let mapper = match inner.resolve_output(path, &paths, backend, suite_config).await {
            Ok(mapper) => mapper,
            Err(e) if inner.is_closed() => {
                debug!(suite = %path.display(), error = %e, "Load abandoned after close");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let url = inner.suite_url(&paths, backend, suite_config)?;
        if inner.is_closed() {
            return Ok(None);
        }

        let generation = inner.registry.generation();
        let manager = match inner.registry.manager_for(identity).await {
            Ok(Some(manager)) => manager,
            Ok(None) => return Ok(None),
            Err(e) if inner.abandoned(generation) => {
                debug!(suite = %path.display(), error = %e, "Launch abandoned after browsers closed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if inner.abandoned(generation) {
            return Ok(None);
        }

        let mapper = if identity.is_js() { mapper } else { None };
        let suite = match manager
            .load(path, url, &suite_config.metadata, extra, mapper)
            .await
        {
            Ok(suite) => suite,
            Err(e) if inner.abandoned(generation) => {
                debug!(suite = %path.display(), error = %e, "Load abandoned after browsers closed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if inner.config.pause_after_load
            && let Err(e) = manager.display_pause().await
        {
            if inner.abandoned(generation) {
                return Ok(None);
            }
            return Err(e);
        }
        if inner.is_closed() {
            return Ok(None);
        }

        info!(suite = %path.display(), browser = %identity, "Suite loaded");
        Ok(Some(suite))
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns `true` if the session closed, or its browsers were closed
    /// since `generation` was read.
    fn abandoned(&self, generation: u64) -> bool {
        self.is_closed() || self.registry.generation() != generation
    }

    /// Checks the browser and backend, returning the backend to use.
    fn validate(&self, identity: &BrowserIdentity, suite_config: &SuiteConfig) -> Result<Backend> {
        if !identity.is_browser() {
            return Err(Error::NotABrowser {
                identifier: identity.identifier().to_string(),
            });
        }

        let backend = suite_config.backend_or(identity.default_backend());
        if !identity.supports(backend) {
            return Err(Error::UnsupportedBackend {
                backend,
                browser: identity.name().to_string(),
            });
        }

        if suite_config.external_build && self.external.is_none() {
            return Err(Error::config(
                "External build requested but no external build URL is configured.",
            ));
        }

        let compiles_here = backend.compiles()
            && !suite_config.external_build
            && suite_config.precompiled_root.is_none();
        if compiles_here && self.pool.is_none() {
            return Err(Error::config(format!(
                "The {backend} backend needs a compiler. Use .compiler() to set one."
            )));
        }

        Ok(backend)
    }

    /// Checks the suite's own HTML page, if it has one.
    async fn validate_fixture(&self, path: &Path, paths: &SuitePaths) -> Result<()> {
        let fixture = paths.fixture(&self.root);
        let contents = match tokio::fs::read_to_string(&fixture).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let html = paths.html();

        if let Some(template) = &self.template
            && template.path.file_name() == fixture.file_name()
        {
            return Err(Error::load(
                path,
                format!(
                    "Template file \"{}\" cannot be named the same as the test file \"{html}\".",
                    template.path.display()
                ),
            ));
        }

        if !contents.contains(PAGE_BOOTSTRAP) {
            return Err(Error::load(
                path,
                format!(
                    "\"{html}\" must contain <script src=\"{PAGE_BOOTSTRAP}\"></script>."
                ),
            ));
        }

        Ok(())
    }

    /// Makes the suite's output available and returns its stack trace mapper.
    async fn resolve_output(
        &self,
        path: &Path,
        paths: &SuitePaths,
        backend: Backend,
        suite_config: &SuiteConfig,
    ) -> Result<Option<Arc<StackTraceMapper>>> {
        if suite_config.external_build
            && let Some(external) = &self.external
        {
            let mapper = external
                .fetch_suite(path, paths, backend, suite_config.js_trace, &self.mapper_context)
                .await?;
            return Ok(self.store_mapper(path, mapper));
        }

        if !backend.compiles() {
            return Ok(None);
        }

        if let Some(root) = &suite_config.precompiled_root
            && let Some(mapper) = self.use_precompiled(path, paths, backend, root, suite_config).await?
        {
            return Ok(mapper);
        }

        let pool = self.pool.as_ref().ok_or_else(|| {
            Error::config(format!(
                "The {backend} backend needs a compiler. Use .compiler() to set one."
            ))
        })?;

        if backend == Backend::Modular {
            pool.compile_runtime().await?;
        }
        pool.compile(CompileJob {
            path: path.to_path_buf(),
            source: self.root.join(path),
            paths: paths.clone(),
            backend,
            js_trace: suite_config.js_trace,
        })
        .await?;

        if suite_config.js_trace {
            return Ok(None);
        }
        Ok(self.maps.get(path))
    }

    /// Mounts a precompiled root holding this suite's output.
    ///
    /// Returns `None` if the root lacks the output, else the mapper result.
    async fn use_precompiled(
        &self,
        path: &Path,
        paths: &SuitePaths,
        backend: Backend,
        root: &Path,
        suite_config: &SuiteConfig,
    ) -> Result<Option<Option<Arc<StackTraceMapper>>>> {
        let root = self.root.join(root);
        let served = match backend {
            Backend::Modular => paths.module(),
            _ => paths.bundle(),
        };
        if !tokio::fs::try_exists(root.join(&served)).await? {
            debug!(root = %root.display(), suite = %path.display(), "No precompiled output");
            return Ok(None);
        }
        if self.is_closed() {
            return Ok(Some(None));
        }

        self.precompiled.register(root.clone());
        if suite_config.js_trace {
            return Ok(Some(None));
        }

        let map_path = format!("{served}.map");
        let map_file = root.join(&map_path);
        if !tokio::fs::try_exists(&map_file).await? {
            return Ok(Some(None));
        }

        let mapper = StackTraceMapper::load(
            &map_file,
            self.url.join(&map_path)?,
            self.mapper_context.clone(),
        )
        .await?;
        Ok(Some(self.store_mapper(path, Some(mapper))))
    }

    /// Caches `mapper` for `path` unless the session closed.
    fn store_mapper(
        &self,
        path: &Path,
        mapper: Option<StackTraceMapper>,
    ) -> Option<Arc<StackTraceMapper>> {
        let mapper = mapper?;
        if self.is_closed() {
            return None;
        }
        self.maps.insert(path, mapper);
        self.maps.get(path)
    }

    /// Returns the URL the browser loads the suite from.
    fn suite_url(
        &self,
        paths: &SuitePaths,
        backend: Backend,
        suite_config: &SuiteConfig,
    ) -> Result<Url> {
        if suite_config.external_build
            && let Some(external) = &self.external
        {
            return external.suite_url(paths, backend);
        }

        let mut url = self.url.join(&paths.html())?;
        url.query_pairs_mut()
            .append_pair("mode", backend.page_mode());
        Ok(url)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl ServerSession {
    /// Closes every browser, leaving the server running.
    ///
    /// Loads waiting on a closed browser return `Ok(None)`. Later loads
    /// launch fresh browsers.
    pub async fn close_ephemeral(&self) {
        self.inner.registry.close_all().await;
    }

    /// Tears the session down. Runs once; every call observes the same completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Task`] if teardown panicked.
    pub async fn close(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .close_once
            .run(move || async move {
                inner.teardown().await;
                Ok(())
            })
            .await
            .map_err(Error::from_shared)
    }
}

impl SessionInner {
    async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Closing server session");

        self.registry.close().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        if let Some(external) = &self.external {
            external.close();
        }
        self.server.close().await;
        self.sockets.clear();

        let temp_dir = self.temp_dir.lock().take();
        if let Some(dir) = temp_dir
            && let Err(e) = dir.close()
        {
            warn!(error = %e, "Failed to remove compile output directory");
        }

        info!(url = %self.url, "Server session closed");
    }
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("url", &self.inner.url)
            .field("root", &self.inner.root)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::browser::Browser;
    use crate::testing::{FakeCompiler, FakeLauncher, init_tracing};

    const SUITE: &str = "test/foo_test.dart";

    struct Fixture {
        dir: TempDir,
        session: ServerSession,
        compiler: Arc<FakeCompiler>,
        launcher: Arc<FakeLauncher>,
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    async fn start(config: ServerConfig, compiler: FakeCompiler, launcher: FakeLauncher) -> Fixture {
        init_tracing();
        let dir = TempDir::new().unwrap();
        write(dir.path(), SUITE, "void main() {}");

        let compiler = Arc::new(compiler);
        let launcher = Arc::new(launcher);
        let session = ServerSession::builder()
            .root(dir.path())
            .config(config)
            .compiler_arc(compiler.clone())
            .launcher_arc(launcher.clone())
            .start()
            .await
            .unwrap();

        Fixture {
            dir,
            session,
            compiler,
            launcher,
        }
    }

    async fn default_fixture() -> Fixture {
        start(ServerConfig::default(), FakeCompiler::new(), FakeLauncher::new()).await
    }

    async fn get(url: Url) -> reqwest::Response {
        reqwest::get(url).await.unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_loads_compile_and_launch_once() {
        let f = start(
            ServerConfig::default(),
            FakeCompiler::new().with_delay(Duration::from_millis(50)),
            FakeLauncher::new(),
        )
        .await;
        let chrome = BrowserIdentity::chrome();
        let config = SuiteConfig::default();

        let (a, b) = tokio::join!(
            f.session.load(SUITE, &chrome, &config, json!(null)),
            f.session.load(SUITE, &chrome, &config, json!(null)),
        );

        let a = a.unwrap().expect("suite");
        let b = b.unwrap().expect("suite");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.initial()["type"], "success");
        assert_eq!(f.compiler.compile_count(Path::new(SUITE)), 1);
        assert_eq!(f.launcher.launch_count(), 1);
        assert!(a.mapper().is_some());
    }

    #[tokio::test]
    async fn test_failed_launch_is_not_retried() {
        let f = start(
            ServerConfig::default(),
            FakeCompiler::new(),
            FakeLauncher::new().failing().with_delay(Duration::from_millis(50)),
        )
        .await;
        let chrome = BrowserIdentity::chrome();
        let config = SuiteConfig::default();

        let (a, b) = tokio::join!(
            f.session.load(SUITE, &chrome, &config, json!(null)),
            f.session.load(SUITE, &chrome, &config, json!(null)),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Ok(None))));
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(Error::is_launch_failure));

        let later = f.session.load(SUITE, &chrome, &config, json!(null)).await;
        assert!(matches!(later, Ok(None)));
        assert_eq!(f.launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_precompiled_root_mounted_once() {
        let f = default_fixture().await;
        write(f.dir.path(), "build/test/foo_test.dart.browser_test.dart.js", "// precompiled");
        write(f.dir.path(), "build/test/bar_test.dart.browser_test.dart.js", "// precompiled");
        write(f.dir.path(), "test/bar_test.dart", "void main() {}");

        let chrome = BrowserIdentity::chrome();
        let config = SuiteConfig {
            precompiled_root: Some("build".into()),
            ..SuiteConfig::default()
        };

        f.session.load(SUITE, &chrome, &config, json!(null)).await.unwrap().unwrap();
        f.session.load("test/bar_test.dart", &chrome, &config, json!(null)).await.unwrap().unwrap();

        assert_eq!(f.session.inner.precompiled.len(), 1);
        assert_eq!(f.compiler.total_compiles(), 0);

        let bundle = f.session.url().join("test/foo_test.dart.browser_test.dart.js").unwrap();
        let response = get(bundle).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "// precompiled");
    }

    #[tokio::test]
    async fn test_close_runs_once() {
        let f = default_fixture().await;
        f.session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await
            .unwrap()
            .unwrap();

        let (a, b) = tokio::join!(f.session.close(), f.session.close());
        a.unwrap();
        b.unwrap();
        f.session.close().await.unwrap();

        assert_eq!(f.compiler.close_count(), 1);
        assert!(f.session.is_closed());
        assert!(f.launcher.browsers().iter().all(|b| b.is_closed()));
        assert!(f.session.inner.temp_dir.lock().is_none());
    }

    #[tokio::test]
    async fn test_load_after_close_is_none() {
        let f = default_fixture().await;
        f.session.close().await.unwrap();

        let suite = f
            .session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await
            .unwrap();

        assert!(suite.is_none());
        assert_eq!(f.launcher.launch_count(), 0);
        assert_eq!(f.compiler.total_compiles(), 0);
        assert!(f.session.inner.dynamic.is_empty());
    }

    #[tokio::test]
    async fn test_close_during_compile_returns_none() {
        let f = start(
            ServerConfig::default(),
            FakeCompiler::new().with_delay(Duration::from_millis(100)),
            FakeLauncher::new(),
        )
        .await;

        let load = {
            let session = f.session.clone();
            tokio::spawn(async move {
                session
                    .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.session.close().await.unwrap();

        assert!(load.await.unwrap().unwrap().is_none());
        assert_eq!(f.launcher.launch_count(), 0);
        assert!(f.session.inner.dynamic.is_empty());
    }

    #[tokio::test]
    async fn test_wrapper_page_and_bundle_served() -> anyhow::Result<()> {
        let f = default_fixture().await;
        f.session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await?
            .ok_or_else(|| anyhow::anyhow!("suite not loaded"))?;
        assert_eq!(f.compiler.compile_count(Path::new(SUITE)), 1);

        let page = reqwest::get(f.session.url().join("test/foo_test.html")?).await?;
        assert_eq!(page.status(), 200);
        let html = page.text().await?;
        assert!(html.contains(r#"<script src="foo_test.dart.browser_test.dart.js"></script>"#));

        let bundle =
            reqwest::get(f.session.url().join("test/foo_test.dart.browser_test.dart.js")?).await?;
        assert_eq!(bundle.status(), 200);
        assert_eq!(bundle.headers()["content-type"], "application/javascript");
        Ok(())
    }

    #[tokio::test]
    async fn test_fixture_without_bootstrap_fails_early() {
        let f = default_fixture().await;
        write(f.dir.path(), "test/foo_test.html", "<html><body></body></html>");

        let err = f
            .session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await
            .unwrap_err();

        assert!(err.is_load_failure());
        assert!(err.to_string().contains("test/foo_test.html"));
        assert_eq!(f.compiler.total_compiles(), 0);
        assert_eq!(f.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_fixture_with_bootstrap_is_served() {
        let f = default_fixture().await;
        let fixture = format!(r#"<html><head><script src="/{PAGE_BOOTSTRAP}"></script></head></html>"#);
        write(f.dir.path(), "test/foo_test.html", &fixture);

        f.session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await
            .unwrap()
            .unwrap();

        let page = get(f.session.url().join("test/foo_test.html").unwrap()).await;
        assert_eq!(page.text().await.unwrap(), fixture);
    }

    #[tokio::test]
    async fn test_external_not_found_releases_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let f = start(
            ServerConfig::default().with_external_build_url(base),
            FakeCompiler::new(),
            FakeLauncher::new(),
        )
        .await;
        write(f.dir.path(), "test/bar_test.dart", "void main() {}");
        let chrome = BrowserIdentity::chrome();
        let config = SuiteConfig {
            external_build: true,
            ..SuiteConfig::default()
        };

        let err = f.session.load(SUITE, &chrome, &config, json!(null)).await.unwrap_err();
        assert!(err.is_load_failure());
        let message = err.to_string();
        assert!(message.contains(&format!("http://{addr}/test/foo_test.dart.browser_test.dart.js.map")));
        assert!(message.contains("404"));

        let second = f.session.load("test/bar_test.dart", &chrome, &config, json!(null)).await;
        assert!(second.unwrap_err().is_load_failure());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(f.launcher.launch_count(), 0);
        assert_eq!(f.compiler.total_compiles(), 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = default_fixture().await;
        let config = SuiteConfig::default();

        let err = f
            .session
            .load(SUITE, &BrowserIdentity::vm(), &config, json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotABrowser { .. }));

        let modular = SuiteConfig {
            backend: Some(Backend::Modular),
            ..SuiteConfig::default()
        };
        let err = f
            .session
            .load(SUITE, &BrowserIdentity::safari(), &modular, json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedBackend { .. }));

        let external = SuiteConfig {
            external_build: true,
            ..SuiteConfig::default()
        };
        let err = f
            .session
            .load(SUITE, &BrowserIdentity::chrome(), &external, json!(null))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(f.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_modular_compiles_runtime_once() {
        let f = default_fixture().await;
        write(f.dir.path(), "test/bar_test.dart", "void main() {}");
        let chrome = BrowserIdentity::chrome();
        let config = SuiteConfig {
            backend: Some(Backend::Modular),
            ..SuiteConfig::default()
        };

        f.session.load(SUITE, &chrome, &config, json!(null)).await.unwrap().unwrap();
        f.session.load("test/bar_test.dart", &chrome, &config, json!(null)).await.unwrap().unwrap();

        assert_eq!(f.compiler.runtime_count(), 1);
        let runtime = get(f.session.url().join("__runtime__/runtime.module.js").unwrap()).await;
        assert_eq!(runtime.status(), 200);

        let loader = get(
            f.session
                .url()
                .join("test/foo_test.dart.browser_test.dart.modular.js")
                .unwrap(),
        )
        .await;
        assert!(loader.text().await.unwrap().contains("runtime.module.js"));
    }

    #[tokio::test]
    async fn test_close_ephemeral_allows_relaunch() {
        let f = default_fixture().await;
        let chrome = BrowserIdentity::chrome();
        let config = SuiteConfig::default();

        f.session.load(SUITE, &chrome, &config, json!(null)).await.unwrap().unwrap();
        f.session.close_ephemeral().await;
        f.session.close_ephemeral().await;
        assert!(f.launcher.browsers()[0].is_closed());

        f.session.load(SUITE, &chrome, &config, json!(null)).await.unwrap().unwrap();
        assert_eq!(f.launcher.launch_count(), 2);
        assert_eq!(f.compiler.compile_count(Path::new(SUITE)), 1);
    }

    #[tokio::test]
    async fn test_close_ephemeral_during_launch_returns_none() {
        let f = start(
            ServerConfig::default(),
            FakeCompiler::new(),
            FakeLauncher::new().with_delay(Duration::from_millis(100)),
        )
        .await;
        let chrome = BrowserIdentity::chrome();
        f.session
            .load(SUITE, &chrome, &SuiteConfig::default(), json!(null))
            .await
            .unwrap()
            .unwrap();
        f.session.close_ephemeral().await;

        for _ in 0..3 {
            let session = f.session.clone();
            let load = tokio::spawn(async move {
                session
                    .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
                    .await
            });
            tokio::time::sleep(Duration::from_millis(30)).await;
            f.session.close_ephemeral().await;

            let result = load.await.unwrap();
            assert!(matches!(result, Ok(None)), "unexpected {result:?}");
        }

        let suite = f
            .session
            .load(SUITE, &chrome, &SuiteConfig::default(), json!(null))
            .await
            .unwrap();
        assert!(suite.is_some());
        assert!(!f.session.is_closed());
    }

    #[tokio::test]
    async fn test_stray_request_keeps_socket_path() {
        let f = start(
            ServerConfig::default(),
            FakeCompiler::new(),
            FakeLauncher::new().with_delay(Duration::from_millis(150)),
        )
        .await;

        let session = f.session.clone();
        let load = tokio::spawn(async move {
            session
                .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
                .await
        });
        while f.launcher.host_urls().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let host = f.launcher.host_urls().remove(0);
        let manager_url = host
            .query_pairs()
            .find(|(key, _)| key == "managerUrl")
            .map(|(_, value)| value.replacen("ws://", "http://", 1))
            .unwrap();
        let stray = get(Url::parse(&manager_url).unwrap()).await;
        assert_eq!(stray.status(), 400);

        let suite = load.await.unwrap().unwrap();
        assert!(suite.is_some());
        assert_eq!(f.launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_requests_need_secret() {
        let f = default_fixture().await;
        let port = f.session.url().port().unwrap();

        let outside = get(Url::parse(&format!("http://127.0.0.1:{port}/{SUITE}")).unwrap()).await;
        assert_eq!(outside.status(), 404);

        let inside = get(f.session.url().join(SUITE).unwrap()).await;
        assert_eq!(inside.status(), 200);

        let favicon = get(Url::parse(&format!("http://127.0.0.1:{port}/favicon.ico")).unwrap()).await;
        assert_eq!(favicon.status(), 200);
        assert_eq!(favicon.headers()["content-type"], "image/x-icon");
    }

    #[tokio::test]
    async fn test_host_url_points_at_host_page() {
        let f = default_fixture().await;
        f.session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await
            .unwrap()
            .unwrap();

        let host = f.launcher.host_urls().remove(0);
        assert!(host.as_str().starts_with(f.session.url().as_str()));
        let page = get(host).await;
        assert_eq!(page.status(), 200);
        assert!(page.text().await.unwrap().contains("host.js"));
    }

    #[tokio::test]
    async fn test_customize_browser_settings_reach_launcher() {
        let f = default_fixture().await;
        let headless = BrowserIdentity::firefox().extend("Firefox Headless", "firefox-headless");
        f.session.customize_browser(
            &BrowserIdentity::firefox(),
            ExecutableSettings::new().with_args(["--private"]),
        );

        let resolved = f.session.inner.settings.resolve(&headless).unwrap();
        assert_eq!(resolved.arguments, vec!["--private".to_string()]);
    }

    #[tokio::test]
    async fn test_variant_settings_merge_over_root_at_launch() {
        let f = default_fixture().await;
        let firefox = BrowserIdentity::firefox();
        let headless = firefox.extend("Firefox Headless", "firefox-headless");
        f.session.customize_browser(
            &firefox,
            ExecutableSettings::new().with_executable("/opt/ff").with_args(["--a"]),
        );
        f.session
            .customize_browser(&headless, ExecutableSettings::new().with_args(["--headless"]));

        f.session
            .load(SUITE, &headless, &SuiteConfig::default(), json!(null))
            .await
            .unwrap()
            .unwrap();

        let launched = f.launcher.launch_settings().remove(0).expect("settings");
        assert_eq!(launched.linux_executable.as_deref(), Some("/opt/ff"));
        assert_eq!(launched.arguments, vec!["--a", "--headless"]);
    }

    #[tokio::test]
    async fn test_browser_closed_when_session_closes() {
        let f = default_fixture().await;
        f.session
            .load(SUITE, &BrowserIdentity::chrome(), &SuiteConfig::default(), json!(null))
            .await
            .unwrap()
            .unwrap();

        f.session.close().await.unwrap();
        let browser = f.launcher.browsers().remove(0);
        tokio::time::timeout(Duration::from_secs(1), browser.wait_exit())
            .await
            .unwrap();
    }
}
