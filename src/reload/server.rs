//! WebSocket Server for Hot Reload
//!
//! Accepts browser connections and broadcasts [`HmrEvent`]s to every live
//! client as JSON protocol messages.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tungstenite::{Message, WebSocket, accept};

use super::{HmrEvent, HmrNotifier, HotReloadMessage};

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Fan-out notifier backed by the WebSocket client registry.
#[derive(Clone, Default)]
pub struct WsBroadcaster {
    clients: Clients,
}

impl WsBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    fn broadcast(&self, message: &HotReloadMessage) {
        let json = message.to_json();
        let mut clients = self.clients.lock();
        clients.retain_mut(|ws| ws.send(Message::text(json.clone())).is_ok());
    }
}

impl HmrNotifier for WsBroadcaster {
    fn emit(&self, event: HmrEvent) {
        self.broadcast(&event.into());
    }
}

/// Start the WebSocket accept loop on `base_port` (retrying upward when the
/// port is taken). Returns the bound port.
pub fn start_ws_server(base_port: u16, broadcaster: WsBroadcaster) -> Result<u16> {
    let (listener, actual_port) = try_bind_port(base_port, MAX_PORT_RETRIES)?;

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else {
                continue;
            };
            let addr = stream.peer_addr().ok();
            match accept(stream) {
                Ok(mut ws) => {
                    crate::debug!("reload"; "client connected: {:?}", addr);
                    if ws
                        .send(Message::text(HotReloadMessage::connected().to_json()))
                        .is_ok()
                    {
                        broadcaster.clients.lock().push(ws);
                    }
                }
                Err(e) => {
                    crate::debug!("reload"; "handshake failed: {}", e);
                }
            }
        }
    });

    Ok(actual_port)
}

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(format!("127.0.0.1:{}", port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                return Ok((listener, actual_port));
            }
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to bind WebSocket server after {} attempts: {}",
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}
