//! Frames exchanged on the `/ws/events` subscription socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::Channel;

// ============================================================================
// Client -> Server
// ============================================================================

/// A client frame before validation.
///
/// Kept loose on purpose: the hub distinguishes "not JSON", "unknown type" and
/// "unknown channel", which a tagged enum would collapse into one serde error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Frames sent from the backend to dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once right after the upgrade.
    Connected,

    /// Acknowledges a subscribe request.
    Subscribed {
        /// Bucket name or `session`.
        channel: String,
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
    },

    /// A bus event routed to this client.
    Event {
        channel: Channel,
        #[serde(rename = "eventType")]
        event_type: String,
        data: Value,
    },

    /// Reply to a client `ping`.
    Pong,

    /// Periodic keepalive.
    Heartbeat,

    /// A recoverable error; the connection stays open.
    Error { data: String },
}

impl ServerMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            data: reason.into(),
        }
    }
}
