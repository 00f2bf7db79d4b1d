//! Development artifact server.
//!
//! Thin tiny_http loop serving compiled module artifacts out of the build
//! cache, a generated HTML shell at `/`, and the hot-reload client at
//! `/-/hmr.js`. Compilation semantics live entirely in the engine; this layer
//! only maps request paths onto persisted artifacts.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tiny_http::{Header, Response, Server};

use crate::config::KilnConfig;
use crate::core::{is_shutdown, register_server};
use crate::engine::{CompilationEngine, MAIN_MODULE_ID};
use crate::log;
use crate::reload::CLIENT_JS;
use crate::utils::mime;

/// Bind the HTTP server on the configured port.
pub fn bind(config: &KilnConfig) -> Result<Arc<Server>> {
    let addr = format!("127.0.0.1:{}", config.serve.port);
    let server = Server::http(&addr)
        .map_err(|e| anyhow::anyhow!("failed to bind http server on {addr}: {e}"))?;
    let server = Arc::new(server);
    register_server(server.clone());
    Ok(server)
}

/// Serve requests until shutdown. Blocks the calling thread.
pub fn run(server: Arc<Server>, config: Arc<KilnConfig>, engine: Arc<CompilationEngine>, ws_port: u16) {
    log!("serve"; "http://127.0.0.1:{}/", config.serve.port);

    for request in server.incoming_requests() {
        if is_shutdown() {
            break;
        }

        let url = request.url().split('?').next().unwrap_or("/").to_string();
        let response = respond(&url, &config, &engine, ws_port);

        let _ = match response {
            Ok((body, content_type)) => {
                let mut resp = Response::from_data(body);
                if let Some(header) = content_type_header(content_type) {
                    resp = resp.with_header(header);
                }
                request.respond(resp)
            }
            Err(status) => {
                request.respond(Response::from_string("not found").with_status_code(status))
            }
        };
    }
}

fn respond(
    url: &str,
    config: &KilnConfig,
    engine: &CompilationEngine,
    ws_port: u16,
) -> Result<(Vec<u8>, &'static str), u16> {
    if url == "/-/hmr.js" {
        return Ok((CLIENT_JS.as_bytes().to_vec(), mime::types::JAVASCRIPT));
    }

    if url == "/" || url == "/index.html" {
        return Ok((index_html(engine, ws_port).into_bytes(), mime::types::HTML));
    }

    // Everything else maps onto a persisted artifact.
    let rel = url.trim_start_matches('/');
    let path: PathBuf = config.modules_dir().join(rel);
    if !path.is_file() {
        return Err(404);
    }
    let body = fs::read(&path).map_err(|_| 500u16)?;
    Ok((body, mime::from_path(&path)))
}

/// Minimal HTML shell bootstrapping the entry module + hot reload client.
fn index_html(engine: &CompilationEngine, ws_port: u16) -> String {
    let main_src = engine
        .store()
        .get(MAIN_MODULE_ID)
        .map(|m| m.import_path())
        .unwrap_or_else(|| "/main.js".to_string());

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <script>window.__KILN = window.__KILN || {{ applyCSS(id, css) {{\
         const el = document.createElement(\"style\"); el.setAttribute(\"data-module-id\", id); \
         el.textContent = css; document.head.appendChild(el); }}, \
         boot(app) {{ window.__KILN.app = app; }}, \
         navigate(href) {{ location.href = href; }} }};\
         window.__KILN_WS_PORT = {ws_port};</script>\n\
         <script src=\"/-/hmr.js\"></script>\n\
         </head>\n<body>\n<div id=\"root\"></div>\n\
         <script type=\"module\" src=\"{main_src}\"></script>\n\
         </body>\n</html>\n"
    )
}

fn content_type_header(value: &'static str) -> Option<Header> {
    Header::from_bytes(&b"Content-Type"[..], value.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BuildMode;
    use crate::graph::ModuleStore;
    use crate::router::RouteTable;

    #[test]
    fn test_index_html_without_entry() {
        let mut config = KilnConfig::default();
        config.root = std::env::temp_dir();
        let engine = CompilationEngine::new(
            Arc::new(config),
            BuildMode::DEVELOPMENT,
            Arc::new(ModuleStore::new()),
            Arc::new(RouteTable::new()),
        );
        let html = index_html(&engine, 8081);
        assert!(html.contains("/main.js"));
        assert!(html.contains("/-/hmr.js"));
        assert!(html.contains("__KILN_WS_PORT = 8081"));
    }
}
