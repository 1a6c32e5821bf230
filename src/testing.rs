//! In-process stand-ins for the external collaborators, used by tests.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::browser::{Browser, BrowserIdentity, BrowserLauncher, ExecutableSettings};
use crate::compiler::{CompileRequest, Compiler, with_suffix};
use crate::error::{Error, Result};

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Minimal valid source map written next to fake compiler output.
pub const SOURCE_MAP: &str =
    r#"{"version":3,"sources":["foo_test.dart"],"names":[],"mappings":"AAAA"}"#;

// ============================================================================
// FakeBrowser
// ============================================================================

/// Browser handle that only records whether it was closed.
#[derive(Debug, Clone)]
pub struct FakeBrowser {
    closed: Arc<watch::Sender<bool>>,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self {
            closed: Arc::new(watch::channel(false).0),
        }
    }
}

impl FakeBrowser {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn wait_exit(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|done| *done).await;
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        Ok(())
    }
}

// ============================================================================
// FakeLauncher
// ============================================================================

/// Launcher whose "browser" is a WebSocket client acting as the host page.
///
/// The client answers every `loadSuite` with a `success` reply on the
/// suite's channel.
#[derive(Default)]
pub struct FakeLauncher {
    launches: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
    browsers: Mutex<Vec<FakeBrowser>>,
    host_urls: Mutex<Vec<Url>>,
    settings: Mutex<Vec<Option<ExecutableSettings>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Every launch waits `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn browsers(&self) -> Vec<FakeBrowser> {
        self.browsers.lock().clone()
    }

    pub fn host_urls(&self) -> Vec<Url> {
        self.host_urls.lock().clone()
    }

    /// Settings passed to each launch, in order.
    pub fn launch_settings(&self) -> Vec<Option<ExecutableSettings>> {
        self.settings.lock().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(
        &self,
        identity: &BrowserIdentity,
        host_url: &Url,
        settings: Option<&ExecutableSettings>,
    ) -> Result<Box<dyn Browser>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.host_urls.lock().push(host_url.clone());
        self.settings.lock().push(settings.cloned());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::launch_failed(identity.name(), "fake launch failure"));
        }

        let manager_url = host_url
            .query_pairs()
            .find(|(key, _)| key == "managerUrl")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Error::protocol("Host URL has no managerUrl"))?;

        let browser = FakeBrowser::default();
        tokio::spawn(run_host_page(manager_url, browser.subscribe()));
        self.browsers.lock().push(browser.clone());

        Ok(Box::new(browser))
    }
}

/// Connects to the manager socket and acknowledges every suite load.
async fn run_host_page(manager_url: String, mut closed: watch::Receiver<bool>) {
    let Ok((mut ws, _)) = connect_async(manager_url.as_str()).await else {
        return;
    };

    loop {
        tokio::select! {
            _ = closed.changed() => {
                let _ = ws.close(None).await;
                break;
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    if frame[0] == 0 && frame[1]["command"] == "loadSuite" {
                        let reply = json!([frame[1]["channel"], {"type": "success"}]);
                        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(_)) => {}
                _ => break,
            }
        }
    }
}

// ============================================================================
// FakeCompiler
// ============================================================================

/// Compiler writing placeholder output and a source map.
#[derive(Default)]
pub struct FakeCompiler {
    counts: Mutex<FxHashMap<PathBuf, usize>>,
    runtime: AtomicUsize,
    closes: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Option<Duration>,
    fail: bool,
}

impl FakeCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every compile waits `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every compile fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn compile_count(&self, suite: &Path) -> usize {
        self.counts.lock().get(suite).copied().unwrap_or(0)
    }

    pub fn total_compiles(&self) -> usize {
        self.counts.lock().values().sum()
    }

    pub fn runtime_count(&self) -> usize {
        self.runtime.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, request: &CompileRequest) -> Result<()> {
        *self.counts.lock().entry(request.suite.clone()).or_default() += 1;

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(Error::compile(&request.suite, "fake compile failure"));
        }

        tokio::fs::write(&request.entrypoint, &request.entrypoint_source).await?;
        tokio::fs::write(
            &request.output,
            format!("// compiled {}\n", request.suite.display()),
        )
        .await?;
        tokio::fs::write(with_suffix(&request.output, ".map"), SOURCE_MAP).await?;
        Ok(())
    }

    async fn compile_runtime(&self, output: &Path) -> Result<()> {
        self.runtime.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, "// runtime\n").await?;
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
