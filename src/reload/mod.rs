//! Hot-module-replacement notification.
//!
//! The compilation core emits [`HmrEvent`]s through an [`HmrNotifier`]
//! collaborator; the WebSocket broadcaster is the shipped transport.

mod message;
mod server;

pub use message::HotReloadMessage;
pub use server::{WsBroadcaster, start_ws_server};

/// Client-side hot reload script, served at `/-/hmr.js`.
pub const CLIENT_JS: &str = include_str!("client.js");

/// Events the compilation core emits toward HMR listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrEvent {
    /// A new module appeared (url + optional route pattern).
    Add {
        url: String,
        pattern: Option<String>,
    },
    /// A module was removed.
    Remove { url: String },
    /// A module (or one of its dependents) recompiled with a new hash.
    Modify { url: String, hash: String },
    /// Compilation failed; clients render a diagnostic overlay.
    Error { path: String, error: String },
    /// Compilation recovered; clients clear the overlay.
    ClearError,
}

/// HMR notifier collaborator interface.
pub trait HmrNotifier: Send + Sync {
    fn emit(&self, event: HmrEvent);
}

/// Notifier that drops every event (build mode, tests).
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl HmrNotifier for NoopNotifier {
    fn emit(&self, _event: HmrEvent) {}
}
