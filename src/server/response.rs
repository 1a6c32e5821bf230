//! Response constructors.

// ============================================================================
// Imports
// ============================================================================

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderValue, SEC_WEBSOCKET_ACCEPT, UPGRADE,
};
use hyper::{Response, StatusCode};

// ============================================================================
// Types
// ============================================================================

/// Response type produced by every handler.
pub type HttpResponse = Response<Full<Bytes>>;

// ============================================================================
// Constructors
// ============================================================================

/// Builds a response with a body and content type.
#[must_use]
pub fn bytes(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    response
}

/// Builds a `200 OK` response.
#[inline]
#[must_use]
pub fn ok(content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    bytes(StatusCode::OK, content_type, body)
}

/// Builds a plain-text response.
#[inline]
#[must_use]
pub fn text(status: StatusCode, body: &str) -> HttpResponse {
    bytes(status, "text/plain; charset=utf-8", body.to_string())
}

/// Builds a `404 Not Found` response.
#[inline]
#[must_use]
pub fn not_found() -> HttpResponse {
    text(StatusCode::NOT_FOUND, "Not Found")
}

/// Builds the `101 Switching Protocols` response for a WebSocket upgrade.
#[must_use]
pub fn switching_protocols(accept: &str) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(value) = HeaderValue::from_str(accept) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, value);
    }

    response
}

// ============================================================================
// Content Types
// ============================================================================

/// Returns the content type served for `path`.
///
/// Scripts and source maps use fixed types; everything else is guessed from
/// the extension.
#[must_use]
pub fn content_type_for(path: &str) -> String {
    if path.ends_with(".js") {
        return "application/javascript".to_string();
    }
    if path.ends_with(".map") {
        return "application/json".to_string();
    }
    if path.ends_with(".html") {
        return "text/html; charset=utf-8".to_string();
    }

    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("a/b.browser_test.dart.js"), "application/javascript");
        assert_eq!(content_type_for("a/b.js.map"), "application/json");
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("style.css"), "text/css");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_switching_protocols_headers() {
        let response = switching_protocols("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[UPGRADE], "websocket");
        assert_eq!(
            response.headers()[SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_not_found() {
        assert_eq!(not_found().status(), StatusCode::NOT_FOUND);
    }
}
