//! External build server client.
//!
//! When an external build server compiles suites, the session fetches their
//! output over HTTP instead of compiling in-process. Suite fetches are
//! serialized through a single slot so the build server's output stays in
//! order; passthrough requests from the browser are not gated.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Request;
use hyper::StatusCode;
use hyper::body::{Bytes, Incoming};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

use crate::browser::Backend;
use crate::error::{Error, Result};
use crate::server::naming::SuitePaths;
use crate::server::response::{self, HttpResponse};
use crate::server::Handler;
use crate::stack_trace::{MapperContext, StackTraceMapper};

// ============================================================================
// Constants
// ============================================================================

/// How long a fetch runs before the slow-build notice is logged.
const SLOW_FETCH_NOTICE: Duration = Duration::from_secs(1);

// ============================================================================
// ExternalBuild
// ============================================================================

/// HTTP client for an external build server.
pub struct ExternalBuild {
    client: Client,
    base: Url,
    /// One suite fetch at a time.
    gate: Semaphore,
}

impl ExternalBuild {
    /// Creates a client for the build server at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(base: Url) -> Result<Self> {
        let base = with_trailing_slash(base);
        let client = Client::builder().build()?;
        info!(url = %base, "Using external build server");

        Ok(Self {
            client,
            base,
            gate: Semaphore::new(1),
        })
    }

    /// Returns the build server base URL.
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Returns the URL of a suite's wrapper page on the build server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the path cannot be joined.
    pub fn suite_url(&self, paths: &SuitePaths, backend: Backend) -> Result<Url> {
        let mut url = self.base.join(&paths.html())?;
        url.query_pairs_mut().append_pair("mode", backend.page_mode());
        Ok(url)
    }

    /// Waits for a suite's output to be built.
    ///
    /// Fetches the source map and parses it into a mapper unless `js_trace`
    /// is set, in which case only the compiled output is fetched. Native
    /// suites fetch their source.
    ///
    /// # Errors
    ///
    /// - [`Error::LoadFailure`] naming the URL on a transport error or non-200 status
    /// - [`Error::SourceMap`] if the fetched map is malformed
    pub async fn fetch_suite(
        &self,
        path: &Path,
        paths: &SuitePaths,
        backend: Backend,
        js_trace: bool,
        context: &MapperContext,
    ) -> Result<Option<StackTraceMapper>> {
        let served = match backend {
            Backend::Source => return self.fetch(path, paths.rel()).await.map(|_| None),
            Backend::Modular => paths.module(),
            Backend::Bundle => paths.bundle(),
        };

        if js_trace {
            self.fetch(path, &served).await?;
            return Ok(None);
        }

        let map_path = format!("{served}.map");
        let contents = self.fetch(path, &map_path).await?;
        let map_url = self.base.join(&map_path)?;
        StackTraceMapper::new(contents, map_url, context.clone()).map(Some)
    }

    /// Fetches `rel` from the build server through the single fetch slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoadFailure`] for `path` naming the URL on failure.
    pub async fn fetch(&self, path: &Path, rel: &str) -> Result<String> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let url = self.base.join(rel)?;
        debug!(url = %url, "Fetching from external build server");

        let response = with_slow_notice(&url, self.client.get(url.clone()).send())
            .await
            .map_err(|e| Error::load(path, format!("Error getting {url}: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::load(path, format!("Error getting {url}: {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| Error::load(path, format!("Error getting {url}: {e}")))
    }

    /// Proxies a request path to the build server.
    ///
    /// Returns `None` unless the build server answers 200.
    pub async fn passthrough(&self, path: &str, query: Option<&str>) -> Option<HttpResponse> {
        let mut url = self.base.join(path).ok()?;
        url.set_query(query);

        let response = match with_slow_notice(&url, self.client.get(url.clone()).send()).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "External passthrough failed");
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            return None;
        }

        let content_type = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| response::content_type_for(path));
        let body: Bytes = response.bytes().await.ok()?;

        Some(response::ok(&content_type, body))
    }

    /// Returns `true` while no fetch holds the slot.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.gate.available_permits() == 1
    }

    /// Rejects further suite fetches.
    pub fn close(&self) {
        self.gate.close();
    }
}

#[async_trait]
impl Handler for ExternalBuild {
    async fn handle(&self, request: &mut Request<Incoming>, path: &str) -> Option<HttpResponse> {
        let query = request.uri().query().map(String::from);
        self.passthrough(path, query.as_deref()).await
    }
}

/// Logs once if `request` takes longer than [`SLOW_FETCH_NOTICE`].
async fn with_slow_notice<T>(url: &Url, request: impl Future<Output = T>) -> T {
    tokio::pin!(request);
    tokio::select! {
        result = &mut request => result,
        () = tokio::time::sleep(SLOW_FETCH_NOTICE) => {
            info!(url = %url, "Waiting for the external build server to finish compiling");
            request.await
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SOURCE_MAP: &str =
        r#"{"version":3,"sources":["foo_test.dart"],"names":[],"mappings":"AAAA"}"#;

    /// Serves a fixed response to every request, counting them.
    async fn fixed_server(status: &'static str, body: &'static str) -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (Url::parse(&format!("http://{addr}/build")).unwrap(), hits)
    }

    fn suite() -> SuitePaths {
        SuitePaths::new(Path::new("test/foo_test.dart")).unwrap()
    }

    #[test]
    fn test_suite_url() {
        let build = ExternalBuild::new(Url::parse("http://localhost:8080/out").unwrap()).unwrap();
        let url = build.suite_url(&suite(), Backend::Modular).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/out/test/foo_test.html?mode=modular");
    }

    #[tokio::test]
    async fn test_not_found_names_url_and_releases_slot() {
        let (base, hits) = fixed_server("404 Not Found", "").await;
        let build = ExternalBuild::new(base).unwrap();

        let err = build
            .fetch_suite(Path::new("test/foo_test.dart"), &suite(), Backend::Bundle, false, &MapperContext::default())
            .await
            .unwrap_err();

        assert!(err.is_load_failure());
        let message = err.to_string();
        assert!(message.contains("/build/test/foo_test.dart.browser_test.dart.js.map"));
        assert!(message.contains("404"));
        assert!(build.is_idle());

        let second = build.fetch(Path::new("test/bar_test.dart"), "test/bar_test.dart.browser_test.dart.js").await;
        assert!(second.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_builds_mapper() {
        let (base, _) = fixed_server("200 OK", SOURCE_MAP).await;
        let build = ExternalBuild::new(base).unwrap();

        let mapper = build
            .fetch_suite(Path::new("test/foo_test.dart"), &suite(), Backend::Bundle, false, &MapperContext::default())
            .await
            .unwrap();
        assert!(mapper.is_some());

        let skipped = build
            .fetch_suite(Path::new("test/foo_test.dart"), &suite(), Backend::Bundle, true, &MapperContext::default())
            .await
            .unwrap();
        assert!(skipped.is_none());
    }

    #[tokio::test]
    async fn test_passthrough() {
        let (base, _) = fixed_server("200 OK", SOURCE_MAP).await;
        let build = ExternalBuild::new(base).unwrap();

        let response = build.passthrough("test/foo_test.dart.browser_test.dart.js.map", None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, SOURCE_MAP.as_bytes());

        let (missing, _) = fixed_server("404 Not Found", "").await;
        let build = ExternalBuild::new(missing).unwrap();
        assert!(build.passthrough("anything.js", None).await.is_none());
    }

    #[tokio::test]
    async fn test_close_rejects_fetch() {
        let (base, hits) = fixed_server("200 OK", "").await;
        let build = ExternalBuild::new(base).unwrap();
        build.close();

        let err = build.fetch(Path::new("a.dart"), "a.dart").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
