//! Hot Reload Message Protocol
//!
//! Defines the JSON message format for WebSocket communication between the
//! development server and browser clients.

use serde::{Deserialize, Serialize};

use super::HmrEvent;

/// Hot reload message sent over WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HotReloadMessage {
    /// Connection established
    Connected {
        /// Server version for compatibility check
        version: String,
    },

    /// A new module appeared
    Add {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },

    /// A module was removed
    Remove { url: String },

    /// A module recompiled; clients re-import by hashed path
    Modify { url: String, hash: String },

    /// Compilation error (display overlay, no reload)
    Error {
        /// Source file path
        path: String,
        /// Error message
        error: String,
    },

    /// Clear error overlay (compilation succeeded after error)
    #[serde(rename = "clear_error")]
    ClearError,

    /// Keep-alive ping (server → client)
    Ping { ts: u64 },

    /// Keep-alive pong (client → server)
    Pong { ts: u64 },
}

impl HotReloadMessage {
    /// Create a connected message
    pub fn connected() -> Self {
        Self::Connected {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Create a ping message
    pub fn ping() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::Ping { ts }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"ping","ts":0}"#.to_string())
    }

    /// Parse from JSON string
    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

impl From<HmrEvent> for HotReloadMessage {
    fn from(event: HmrEvent) -> Self {
        match event {
            HmrEvent::Add { url, pattern } => Self::Add { url, pattern },
            HmrEvent::Remove { url } => Self::Remove { url },
            HmrEvent::Modify { url, hash } => Self::Modify { url, hash },
            HmrEvent::Error { path, error } => Self::Error { path, error },
            HmrEvent::ClearError => Self::ClearError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modify_serialization() {
        let msg = HotReloadMessage::Modify {
            url: "/pages/index.js".to_string(),
            hash: "deadbeef".to_string(),
        };
        let json = msg.to_json();
        assert!(json.contains(r#""type":"modify""#));
        assert!(json.contains(r#""url":"/pages/index.js""#));
        assert!(json.contains(r#""hash":"deadbeef""#));

        let parsed = HotReloadMessage::from_json(&json).unwrap();
        match parsed {
            HotReloadMessage::Modify { url, hash } => {
                assert_eq!(url, "/pages/index.js");
                assert_eq!(hash, "deadbeef");
            }
            _ => panic!("Expected Modify message"),
        }
    }

    #[test]
    fn test_remove_serialization() {
        let msg: HotReloadMessage = HmrEvent::Remove {
            url: "/pages/about.js".to_string(),
        }
        .into();
        let json = msg.to_json();
        assert!(json.contains(r#""type":"remove""#));
    }

    #[test]
    fn test_add_skips_empty_pattern() {
        let msg: HotReloadMessage = HmrEvent::Add {
            url: "/components/nav.js".to_string(),
            pattern: None,
        }
        .into();
        let json = msg.to_json();
        assert!(!json.contains("pattern"));
    }

    #[test]
    fn test_clear_error_tag() {
        let json = HotReloadMessage::ClearError.to_json();
        assert!(json.contains(r#""type":"clear_error""#));
    }
}
