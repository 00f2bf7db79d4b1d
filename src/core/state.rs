//! Process state tracking for dev-server mode.
//!
//! Three orthogonal states:
//! - `SERVING`: Is the dev server ready to serve compiled artifacts?
//! - `HEALTHY`: Did the last full compile succeed? (hot-reload vs full rebuild)
//! - `SHUTDOWN`: Has shutdown been requested? (Ctrl+C received)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tiny_http::Server;

/// Dev server is ready to serve requests (initial compile complete)
static SERVING: AtomicBool = AtomicBool::new(false);

/// Last full compile succeeded
/// - `false`: Next file change triggers a full recompile
/// - `true`: Next file change triggers incremental recompile + cascade
static HEALTHY: AtomicBool = AtomicBool::new(false);

/// Shutdown has been requested (Ctrl+C received)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// HTTP server reference for graceful shutdown
static SERVER: OnceLock<Arc<Server>> = OnceLock::new();

/// Check if the dev server is ready to serve requests
pub fn is_serving() -> bool {
    SERVING.load(Ordering::SeqCst)
}

/// Mark the dev server as ready (call after initial compile completes)
pub fn set_serving() {
    SERVING.store(true, Ordering::SeqCst);
}

/// Check if the build is healthy (can hot-reload)
pub fn is_healthy() -> bool {
    HEALTHY.load(Ordering::SeqCst)
}

/// Set the health state
pub fn set_healthy(healthy: bool) {
    HEALTHY.store(healthy, Ordering::SeqCst);
}

/// Setup the global Ctrl+C handler. Call once at program start
///
/// The handler behavior depends on whether a server has been registered:
/// - Before `register_server()`: Sets SHUTDOWN flag, process exits immediately
/// - After `register_server()`: Graceful shutdown (unblock server loop)
pub fn setup_shutdown_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        SHUTDOWN.store(true, Ordering::SeqCst);

        if let Some(server) = SERVER.get() {
            crate::log!("serve"; "shutting down...");
            server.unblock();
        } else {
            std::process::exit(0);
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the HTTP server for graceful shutdown
///
/// Call this after binding the server, before entering the request loop
pub fn register_server(server: Arc<Server>) {
    let _ = SERVER.set(server);
}

/// Check if shutdown has been requested
///
/// Uses Relaxed ordering for performance - worst case is processing
/// a few more items before stopping, which is acceptable
pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}
