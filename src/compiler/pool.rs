//! Bounded single-flight compiler pool.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

use crate::browser::Backend;
use crate::error::{Error, Result};
use crate::memo::{AsyncOnce, TaskMap};
use crate::server::DynamicFiles;
use crate::server::naming::{RUNTIME_MODULE, SuitePaths, basename};
use crate::stack_trace::{MapperContext, StackTraceMapper, StackTraceMaps};

use super::{CompileRequest, Compiler, with_suffix};

// ============================================================================
// CompileJob
// ============================================================================

/// A suite to compile.
#[derive(Debug, Clone)]
pub struct CompileJob {
    /// Suite path relative to the root; the single-flight key.
    pub path: PathBuf,
    /// Suite source file on disk.
    pub source: PathBuf,
    /// Served paths of the suite.
    pub paths: SuitePaths,
    /// Backend to compile for.
    pub backend: Backend,
    /// Skip loading a stack trace mapper.
    pub js_trace: bool,
}

// ============================================================================
// CompilerPool
// ============================================================================

/// Shared state of the pool, moved into spawned compiles.
struct PoolContext {
    compiler: Arc<dyn Compiler>,
    slots: Semaphore,
    dynamic: Arc<DynamicFiles>,
    maps: Arc<StackTraceMaps>,
    session_url: Url,
    mapper_context: MapperContext,
    output_root: PathBuf,
    next_dir: AtomicU64,
    closed: AtomicBool,
}

/// Compiles each suite path once, at most `concurrency` at a time.
///
/// Failed compiles stay cached: a second request for the same path observes
/// the same error.
pub struct CompilerPool {
    context: Arc<PoolContext>,
    tasks: TaskMap<PathBuf, PathBuf>,
    runtime: AsyncOnce<PathBuf>,
}

impl CompilerPool {
    /// Creates a pool writing output under `output_root`.
    ///
    /// Compiled files are published to `dynamic` and source maps are loaded
    /// into `maps`, resolved against `session_url`.
    #[must_use]
    pub fn new(
        compiler: Arc<dyn Compiler>,
        concurrency: usize,
        output_root: impl Into<PathBuf>,
        dynamic: Arc<DynamicFiles>,
        maps: Arc<StackTraceMaps>,
        session_url: Url,
        mapper_context: MapperContext,
    ) -> Self {
        Self {
            context: Arc::new(PoolContext {
                compiler,
                slots: Semaphore::new(concurrency),
                dynamic,
                maps,
                session_url,
                mapper_context,
                output_root: output_root.into(),
                next_dir: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            tasks: TaskMap::new(),
            runtime: AsyncOnce::new(),
        }
    }

    /// Compiles `job`, or joins the compile already started for its path.
    ///
    /// Returns the compiled output file.
    ///
    /// # Errors
    ///
    /// - [`Error::Compile`] if the compiler failed
    /// - [`Error::PoolClosed`] if the pool closed before the output was published
    pub async fn compile(&self, job: CompileJob) -> Result<PathBuf> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let context = Arc::clone(&self.context);
        let (task, started) = self
            .tasks
            .get_or_start(job.path.clone(), move || context.run(job));
        if !started {
            debug!("Joining compile already in flight");
        }

        task.await.map_err(Error::from_shared)
    }

    /// Compiles the shared runtime module once for the session.
    ///
    /// # Errors
    ///
    /// Same as [`compile`](Self::compile); a failure is cached.
    pub async fn compile_runtime(&self) -> Result<PathBuf> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let context = Arc::clone(&self.context);
        self.runtime
            .run(move || context.run_runtime())
            .await
            .map_err(Error::from_shared)
    }

    /// Returns the number of suite paths compiled or compiling.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no compile was started.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns `true` once the pool is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.context.closed.load(Ordering::SeqCst)
    }

    /// Stops admitting compiles, stops running ones and waits for them to unwind.
    pub async fn close(&self) {
        if self.context.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.context.slots.close();
        self.context.compiler.close().await;

        let pending = self.tasks.values();
        let count = pending.len();
        join_all(pending).await;
        info!(compiles = count, "Compiler pool closed");
    }
}

impl PoolContext {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Allocates a fresh output directory.
    async fn output_dir(&self, name: &str) -> Result<PathBuf> {
        let index = self.next_dir.fetch_add(1, Ordering::SeqCst);
        let dir = self.output_root.join(format!("{index}-{name}"));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn run(self: Arc<Self>, job: CompileJob) -> Result<PathBuf> {
        let permit = self.slots.acquire().await.map_err(|_| Error::PoolClosed)?;
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let dir = self.output_dir(job.paths.name()).await?;
        let served = match job.backend {
            Backend::Modular => job.paths.module(),
            _ => job.paths.bundle(),
        };
        let output = dir.join(basename(&served));

        let import = Url::from_file_path(&job.source).map_err(|()| {
            Error::config(format!(
                "Suite source \"{}\" is not an absolute path",
                job.source.display()
            ))
        })?;
        let request = CompileRequest {
            suite: job.path.clone(),
            backend: job.backend,
            entrypoint: dir.join(basename(&job.paths.bootstrap())),
            entrypoint_source: self.compiler.bootstrap_source(import.as_str()),
            output: output.clone(),
        };

        self.compiler.compile(&request).await?;
        drop(permit);

        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        self.publish(&job, &served, &output).await?;
        info!(suite = %job.path.display(), backend = %job.backend, "Compiled");
        Ok(output)
    }

    /// Registers compiled files and loads the stack trace mapper.
    async fn publish(&self, job: &CompileJob, served: &str, output: &Path) -> Result<()> {
        self.dynamic
            .register(served, output, "application/javascript");

        let errors = with_suffix(output, ".errors");
        if tokio::fs::try_exists(&errors).await? {
            self.dynamic
                .register(format!("{served}.errors"), errors, "text/plain");
        }

        let map = with_suffix(output, ".map");
        if !tokio::fs::try_exists(&map).await? {
            return Ok(());
        }
        let map_path = format!("{served}.map");
        self.dynamic
            .register(map_path.as_str(), &map, "application/json");

        if !job.js_trace {
            let map_url = self.session_url.join(&map_path)?;
            let mapper = StackTraceMapper::load(&map, map_url, self.mapper_context.clone()).await?;
            self.maps.insert(job.path.clone(), mapper);
        }
        Ok(())
    }

    async fn run_runtime(self: Arc<Self>) -> Result<PathBuf> {
        let permit = self.slots.acquire().await.map_err(|_| Error::PoolClosed)?;
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let dir = self.output_dir("runtime").await?;
        let output = dir.join(basename(RUNTIME_MODULE));
        self.compiler.compile_runtime(&output).await?;
        drop(permit);

        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        self.dynamic
            .register(RUNTIME_MODULE, &output, "application/javascript");
        info!("Compiled runtime module");
        Ok(output)
    }
}

// ============================================================================
// Tests
// ============================================================================
