//! Embedded pages and scripts.
//!
//! # Page Flow
//!
//! 1. The browser opens the host page with `managerUrl` in its query
//! 2. `host.js` connects to the manager socket and waits for `loadSuite`
//! 3. Each suite is opened in an iframe and handed a `MessagePort`
//! 4. The page-side `bootstrap.js` in the iframe exposes that port to the suite
//! 5. Messages are relayed between the port and the suite's virtual channel

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::browser::Backend;
use crate::config::{TEST_NAME_PLACEHOLDER, TEST_SCRIPT_PLACEHOLDER};

use super::naming::{PAGE_BOOTSTRAP, basename};

// ============================================================================
// Wrapper Page
// ============================================================================

/// Builds the `<script>` markup that loads a suite with `backend`.
///
/// `bootstrap` is the suite's bootstrap entrypoint path; only its basename is
/// referenced since the wrapper page lives in the same directory.
#[must_use]
pub fn test_script(backend: Backend, bootstrap: &str) -> String {
    let base = basename(bootstrap);
    let suite = match backend {
        Backend::Bundle => format!(r#"<script src="{base}.js"></script>"#),
        Backend::Modular => format!(r#"<script src="{base}.modular.js"></script>"#),
        Backend::Source => format!(r#"<script type="module" src="{base}"></script>"#),
    };
    format!("<script src=\"{PAGE_BOOTSTRAP}\"></script>\n    {suite}")
}

/// Fills a wrapper page template.
///
/// Uses the built-in template when `template` is `None`.
#[must_use]
pub fn wrapper_html(template: Option<&str>, test_name: &str, test_script: &str) -> String {
    template
        .unwrap_or(WRAPPER_HTML_TEMPLATE)
        .replace(TEST_NAME_PLACEHOLDER, test_name)
        .replace(TEST_SCRIPT_PLACEHOLDER, test_script)
}

// ============================================================================
// Scripts
// ============================================================================

/// Default bootstrap entrypoint importing the suite from `import`.
#[must_use]
pub fn suite_bootstrap(import: &str) -> String {
    SUITE_BOOTSTRAP_TEMPLATE.replace("$IMPORT", import)
}

/// Builds the module loader script for the modular backend.
#[must_use]
pub fn modular_loader(runtime_url: &str, module_url: &str, errors_url: &str) -> String {
    let modules = json!({
        "runtime": runtime_url,
        "suite": module_url,
    });

    MODULAR_LOADER_TEMPLATE
        .replace("$MODULES", &modules.to_string())
        .replace("$ERRORS_URL", &json!(errors_url).to_string())
}

// ============================================================================
// Favicon
// ============================================================================

/// Builds the favicon: a single PNG image wrapped in an ICO container.
#[must_use]
pub fn favicon() -> Vec<u8> {
    let png = STANDARD.decode(FAVICON_PNG).unwrap_or_default();
    let size = png.len() as u32;

    let mut ico = Vec::with_capacity(22 + png.len());
    // ICONDIR: reserved, type (1 = icon), image count
    ico.extend_from_slice(&0u16.to_le_bytes());
    ico.extend_from_slice(&1u16.to_le_bytes());
    ico.extend_from_slice(&1u16.to_le_bytes());
    // ICONDIRENTRY: width, height, palette, reserved, planes, bpp, size, offset
    ico.extend_from_slice(&[16, 16, 0, 0]);
    ico.extend_from_slice(&1u16.to_le_bytes());
    ico.extend_from_slice(&32u16.to_le_bytes());
    ico.extend_from_slice(&size.to_le_bytes());
    ico.extend_from_slice(&22u32.to_le_bytes());
    ico.extend_from_slice(&png);
    ico
}

// ============================================================================
// Constants
// ============================================================================

/// 16x16 PNG of the favicon.
const FAVICON_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAABAAAAAQCAYAAAAf8/9hAAAAGUlEQVR42mOQ63j6nxLMMGrAqAGjBgwXAwAhWYofQ+I2fAAAAABJRU5ErkJggg==";

/// Built-in wrapper page.
const WRAPPER_HTML_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{{testName}} Test</title>
    {{testScript}}
</head>
<body></body>
</html>"##;

/// Default suite entrypoint.
const SUITE_BOOTSTRAP_TEMPLATE: &str = r##"import * as suite from "$IMPORT";

window.__testChannel.then((port) => {
  port.postMessage({ type: "ready" });
  if (typeof suite.main === "function") {
    suite.main(port);
  }
});
"##;

/// Loader for the modular backend.
const MODULAR_LOADER_TEMPLATE: &str = r##"(function () {
  "use strict";
  var modules = $MODULES;
  var errorsUrl = $ERRORS_URL;
  window.__testModules = modules;

  function load(src) {
    return new Promise(function (resolve, reject) {
      var script = document.createElement("script");
      script.src = src;
      script.onload = resolve;
      script.onerror = function () { reject(new Error("Failed to load " + src)); };
      document.head.appendChild(script);
    });
  }

  function reportErrors() {
    return fetch(errorsUrl)
      .then(function (r) { return r.ok ? r.text() : ""; })
      .then(function (text) { if (text) console.error(text); });
  }

  window.addEventListener("error", reportErrors, { once: true });
  load(modules.runtime)
    .then(function () { return load(modules.suite); })
    .catch(function (e) { console.error(e); reportErrors(); });
})();
"##;

/// Page-side bootstrap loaded by every suite page.
pub const PAGE_BOOTSTRAP_JS: &str = r##"(function () {
  "use strict";
  var resolvePort;
  window.__testChannel = new Promise(function (resolve) { resolvePort = resolve; });

  window.addEventListener("message", function (event) {
    if (event.data && event.data.type === "port" && event.ports.length) {
      var port = event.ports[0];
      port.start();
      resolvePort(port);
    }
  });

  var mode = new URLSearchParams(window.location.search).get("mode") || "bundle";
  document.querySelectorAll('link[rel="x-test-script"]').forEach(function (link) {
    var href = link.getAttribute("href");
    var base = href + ".browser_test." + href.split(".").pop();
    var script = document.createElement("script");
    if (mode === "modular") {
      script.src = base + ".modular.js";
    } else if (mode === "native") {
      script.type = "module";
      script.src = base;
    } else {
      script.src = base + ".js";
    }
    document.head.appendChild(script);
  });
})();
"##;

/// Host page given to the browser.
pub const HOST_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Browser Test Host</title>
    <style>
        body { margin: 0; font-family: monospace; }
        iframe { display: none; }
        #pause {
            display: none;
            position: fixed;
            inset: 0;
            background: rgba(0, 0, 0, 0.6);
            color: #fff;
            align-items: center;
            justify-content: center;
        }
        #pause.visible { display: flex; }
    </style>
</head>
<body>
    <div id="pause"><button id="resume">Resume</button></div>
    <script src="host.js"></script>
</body>
</html>"##;

/// Script of the host page.
pub const HOST_JS: &str = r##"(function () {
  "use strict";
  var params = new URLSearchParams(window.location.search);
  var socket = new WebSocket(params.get("managerUrl"));
  var suites = {};

  function send(channel, payload) {
    socket.send(JSON.stringify([channel, payload]));
  }

  function findSuite(id) {
    for (var channel in suites) {
      if (suites[channel].id === id) return channel;
    }
    return null;
  }

  function loadSuite(message) {
    var frame = document.createElement("iframe");
    var ports = new MessageChannel();
    suites[message.channel] = { id: message.id, frame: frame, port: ports.port1 };
    ports.port1.onmessage = function (event) { send(message.channel, event.data); };
    frame.addEventListener("load", function () {
      frame.contentWindow.postMessage({ type: "port" }, "*", [ports.port2]);
    }, { once: true });
    frame.src = message.url;
    document.body.appendChild(frame);
  }

  function closeSuite(channel) {
    var suite = suites[channel];
    if (!suite) return;
    suite.port.close();
    suite.frame.remove();
    delete suites[channel];
  }

  function displayPause() {
    document.getElementById("pause").classList.add("visible");
  }

  document.getElementById("resume").addEventListener("click", function () {
    document.getElementById("pause").classList.remove("visible");
    send(0, { command: "resume" });
  });

  socket.addEventListener("message", function (event) {
    var frame = JSON.parse(event.data);
    var channel = frame[0];
    if (frame.length === 1) {
      closeSuite(channel);
    } else if (channel === 0) {
      var message = frame[1];
      if (message.command === "loadSuite") loadSuite(message);
      else if (message.command === "closeSuite") closeSuite(findSuite(message.id));
      else if (message.command === "displayPause") displayPause();
    } else if (suites[channel]) {
      suites[channel].port.postMessage(frame[1]);
    }
  });

  socket.addEventListener("open", function () {
    setInterval(function () { send(0, { command: "ping" }); }, 1000);
  });

  socket.addEventListener("close", function () {
    document.body.textContent = "Connection to the test server closed.";
  });
})();
"##;

// ============================================================================
// Tests
// ============================================================================
