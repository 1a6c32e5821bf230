//! Browser launch collaborator.
//!
//! The server never drives a browser directly. It asks a [`BrowserLauncher`]
//! to open the host page and receives an opaque [`Browser`] handle that can
//! report process exit and be closed.
//!
//! [`ProcessLauncher`] is the default implementation: it spawns the
//! configured executable with the host URL as its last argument.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

use super::{BrowserIdentity, ExecutableSettings};

// ============================================================================
// Traits
// ============================================================================

/// A running browser.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Resolves once the browser process has exited.
    async fn wait_exit(&self);

    /// Closes the browser. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Launches browsers pointed at a host URL.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Starts `identity` on `host_url` using resolved `settings`.
    ///
    /// Returns once the process is running; connecting back is observed separately.
    async fn launch(
        &self,
        identity: &BrowserIdentity,
        host_url: &Url,
        settings: Option<&ExecutableSettings>,
    ) -> Result<Box<dyn Browser>>;
}

// ============================================================================
// ProcessLauncher
// ============================================================================

/// Launches browsers as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Creates a process launcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Builds the command line for a launch.
    fn command(
        identity: &BrowserIdentity,
        host_url: &Url,
        settings: Option<&ExecutableSettings>,
    ) -> Result<Command> {
        let executable = settings
            .and_then(ExecutableSettings::executable)
            .or_else(|| identity.command())
            .ok_or_else(|| {
                Error::config(format!(
                    "No executable configured for {identity}. Set one with executable settings."
                ))
            })?;

        let mut cmd = Command::new(executable);

        let headless = settings
            .and_then(|s| s.headless)
            .unwrap_or(identity.is_headless());
        if headless {
            cmd.arg("--headless");
        }

        if let Some(settings) = settings {
            cmd.args(&settings.arguments);
        }

        cmd.arg(host_url.as_str());

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl BrowserLauncher for ProcessLauncher {
    async fn launch(
        &self,
        identity: &BrowserIdentity,
        host_url: &Url,
        settings: Option<&ExecutableSettings>,
    ) -> Result<Box<dyn Browser>> {
        let mut cmd = Self::command(identity, host_url, settings)?;
        let child = cmd
            .spawn()
            .map_err(|e| Error::launch_failed(identity.name(), e.to_string()))?;

        info!(browser = %identity, pid = child.id(), "Browser process spawned");
        Ok(Box::new(ProcessBrowser::spawn(identity.name(), child)))
    }
}

// ============================================================================
// ProcessBrowser
// ============================================================================

/// A browser running as a child process.
///
/// A watcher task owns the [`Child`]; closing asks it to kill the process.
pub struct ProcessBrowser {
    /// Display name for logging.
    name: String,
    /// Process ID, `0` if unknown.
    pid: u32,
    /// Kill request for the watcher task.
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Flips to `true` once the process exited.
    exited: watch::Receiver<bool>,
}

impl ProcessBrowser {
    /// Wraps `child` and starts its watcher task.
    fn spawn(name: &str, mut child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!(pid, ?status, "Browser process exited");
                }
                _ = kill_rx => {
                    debug!(pid, "Killing browser process");
                    if let Err(e) = child.kill().await {
                        debug!(pid, error = %e, "Failed to kill process");
                    }
                }
            }
            let _ = exit_tx.send(true);
        });

        Self {
            name: name.to_string(),
            pid,
            kill_tx: Mutex::new(Some(kill_tx)),
            exited: exit_rx,
        }
    }
}

impl fmt::Debug for ProcessBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessBrowser")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Browser for ProcessBrowser {
    async fn wait_exit(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|done| *done).await;
    }

    async fn close(&self) -> Result<()> {
        let kill = self.kill_tx.lock().take();
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        self.wait_exit().await;
        info!(browser = %self.name, pid = self.pid, "Browser closed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    fn host_url() -> Url {
        Url::parse("http://127.0.0.1:1/secret/index.html?managerUrl=x").unwrap()
    }

    #[test]
    fn test_command_requires_executable() {
        let identity = BrowserIdentity::compiled("Nameless", "nameless");
        let result = ProcessLauncher::command(&identity, &host_url(), None);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_command_uses_settings_then_url_last() {
        let identity = BrowserIdentity::firefox();
        let settings = ExecutableSettings::new()
            .with_executable("/opt/ff")
            .with_args(["--no-remote"])
            .with_headless(true);

        let cmd = ProcessLauncher::command(&identity, &host_url(), Some(&settings)).unwrap();
        let std_cmd = cmd.as_std();
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(std_cmd.get_program(), "/opt/ff");
        assert_eq!(args.first().map(String::as_str), Some("--headless"));
        assert!(args.contains(&"--no-remote".to_string()));
        assert_eq!(args.last().map(String::as_str), Some(host_url().as_str()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_browser_reports_exit() {
        let identity = BrowserIdentity::compiled("True", "true").with_command("true");
        let browser = ProcessLauncher::new()
            .launch(&identity, &host_url(), None)
            .await
            .expect("spawn true");

        timeout(Duration::from_secs(5), browser.wait_exit())
            .await
            .expect("process should exit");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_browser_close_kills() {
        // The host URL lands in `$1` and is ignored by the script.
        let shell = BrowserIdentity::compiled("Shell", "sh").with_command("sh");
        let settings = ExecutableSettings::new().with_args(["-c", "sleep 30", "sh"]);
        let browser = ProcessLauncher::new()
            .launch(&shell, &host_url(), Some(&settings))
            .await
            .expect("spawn sh");

        timeout(Duration::from_secs(5), browser.close())
            .await
            .expect("close in time")
            .expect("close ok");
        browser.close().await.expect("second close is a no-op");
    }
}
