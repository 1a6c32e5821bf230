//! Compiler running as an external process.

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::{CompileRequest, Compiler};

// ============================================================================
// CommandCompiler
// ============================================================================

/// Runs `<executable> <args..> --out=<output> <entrypoint>` per compile.
///
/// Stderr becomes the diagnostic of a failed compile. Running children are
/// killed by [`Compiler::close`].
pub struct CommandCompiler {
    executable: String,
    args: Vec<String>,
    runtime_args: Option<Vec<String>>,
    /// Kill switches of running children.
    running: Mutex<FxHashMap<u64, oneshot::Sender<()>>>,
    next_child: AtomicU64,
    closed: AtomicBool,
}

impl CommandCompiler {
    /// Creates a compiler running `executable` with `args`.
    pub fn new<I, S>(executable: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
            runtime_args: None,
            running: Mutex::new(FxHashMap::default()),
            next_child: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enables the runtime module compile, run as
    /// `<executable> <runtime_args..> --out=<output>`.
    #[must_use]
    pub fn with_runtime_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the number of running children.
    #[inline]
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Runs one child to completion, returning its stderr on failure.
    async fn run(&self, mut cmd: Command, suite: &Path) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::compile(suite, format!("Failed to start {}: {e}", self.executable))
        })?;

        let id = self.next_child.fetch_add(1, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.running.lock().insert(id, kill_tx);
        debug!(suite = %suite.display(), pid = child.id(), "Compiler started");

        let mut stderr = child.stderr.take();
        let outcome = tokio::select! {
            finished = async {
                let mut diagnostic = String::new();
                if let Some(stderr) = stderr.as_mut() {
                    stderr.read_to_string(&mut diagnostic).await?;
                }
                let status = child.wait().await?;
                Ok::<(ExitStatus, String), std::io::Error>((status, diagnostic))
            } => Some(finished),
            _ = kill_rx => None,
        };

        self.running.lock().remove(&id);

        let Some(finished) = outcome else {
            let _ = child.kill().await;
            return Err(Error::PoolClosed);
        };

        let (status, diagnostic) = finished?;
        if status.success() {
            return Ok(());
        }

        let diagnostic = diagnostic.trim();
        warn!(suite = %suite.display(), %status, "Compile failed");
        Err(Error::compile(
            suite,
            if diagnostic.is_empty() {
                format!("{} exited with {status}", self.executable)
            } else {
                diagnostic.to_string()
            },
        ))
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn compile(&self, request: &CompileRequest) -> Result<()> {
        tokio::fs::write(&request.entrypoint, &request.entrypoint_source).await?;

        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .arg(format!("--out={}", request.output.display()))
            .arg(&request.entrypoint);

        info!(suite = %request.suite.display(), backend = %request.backend, "Compiling");
        self.run(cmd, &request.suite).await
    }

    async fn compile_runtime(&self, output: &Path) -> Result<()> {
        let Some(runtime_args) = &self.runtime_args else {
            return Err(Error::config(format!(
                "{} has no runtime compile configured.",
                self.executable
            )));
        };

        let mut cmd = Command::new(&self.executable);
        cmd.args(runtime_args)
            .arg(format!("--out={}", output.display()));

        info!("Compiling runtime module");
        self.run(cmd, output).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let kills: Vec<_> = self.running.lock().drain().map(|(_, kill)| kill).collect();
        if !kills.is_empty() {
            debug!(count = kills.len(), "Killing running compiles");
        }
        for kill in kills {
            let _ = kill.send(());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::browser::Backend;

    fn request(dir: &TempDir) -> CompileRequest {
        CompileRequest {
            suite: "test/foo_test.dart".into(),
            backend: Backend::Bundle,
            entrypoint: dir.path().join("foo_test.dart.browser_test.dart"),
            entrypoint_source: "import './foo_test.dart';".into(),
            output: dir.path().join("foo_test.dart.browser_test.dart.js"),
        }
    }

    #[tokio::test]
    async fn test_compile_writes_output() {
        let dir = TempDir::new().unwrap();
        // $1 is --out=<path>
        let compiler = CommandCompiler::new(
            "sh",
            ["-c", r#"echo compiled > "${1#--out=}""#, "sh"],
        );
        let req = request(&dir);

        compiler.compile(&req).await.unwrap();

        assert!(req.entrypoint.exists());
        let output = std::fs::read_to_string(&req.output).unwrap();
        assert_eq!(output.trim(), "compiled");
    }

    #[tokio::test]
    async fn test_compile_failure_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let compiler = CommandCompiler::new("sh", ["-c", "echo 'syntax error' >&2; exit 1", "sh"]);

        let err = compiler.compile(&request(&dir)).await.unwrap_err();
        match err {
            Error::Compile { path, message } => {
                assert_eq!(path, Path::new("test/foo_test.dart"));
                assert_eq!(message, "syntax error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_close_kills_running_compile() {
        let dir = TempDir::new().unwrap();
        let compiler = Arc::new(CommandCompiler::new("sh", ["-c", "sleep 30", "sh"]));
        let req = request(&dir);

        let running = {
            let compiler = Arc::clone(&compiler);
            tokio::spawn(async move { compiler.compile(&req).await })
        };

        while compiler.running_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        compiler.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::PoolClosed)));
        assert_eq!(compiler.running_count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_requires_args() {
        let compiler = CommandCompiler::new("sh", ["-c", "true"]);
        let err = compiler.compile_runtime(Path::new("/tmp/x.js")).await.unwrap_err();
        assert!(err.is_config_error());
    }
}
