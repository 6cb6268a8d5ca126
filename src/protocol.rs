//! JSON events exchanged over the `/ws` WebSocket.
//!
//! Every server frame is a text frame holding one [`ServerEvent`]:
//!
//! ```text
//! {"event": "welcome",      "data": {"session": "...", "msg": "..."}}
//! {"event": "message",      "data": {"from": "...", "data": <any JSON>}}
//! {"event": "notification", "data": {"id": 1, "text": "...", "time": 1.5, "instance": "..."}}
//! {"event": "draining",     "data": {"deadline_secs": 1800}}
//! ```
//!
//! Client text frames are treated as message payloads: valid JSON is relayed
//! as-is, anything else is relayed as a JSON string.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

pub const WELCOME_MESSAGE: &str = "Welcome! Real-time notifications started";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once to a client right after it connects.
    Welcome { session: String, msg: String },
    /// A client message relayed to every local session.
    Message { from: String, data: serde_json::Value },
    /// Periodic server notification.
    Notification {
        id: u64,
        text: String,
        /// Seconds since the Unix epoch.
        time: f64,
        /// Name of the server instance that produced the notification.
        instance: String,
    },
    /// The server has begun draining and will close this connection by the
    /// deadline at the latest.
    Draining { deadline_secs: u64 },
}

impl ServerEvent {
    pub fn welcome(session: &SessionId) -> Self {
        ServerEvent::Welcome {
            session: session.to_string(),
            msg: WELCOME_MESSAGE.to_string(),
        }
    }

    /// Build a relayed message from a raw client text frame.
    pub fn relay(from: &SessionId, text: &str) -> Self {
        let data = serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string()));
        ServerEvent::Message {
            from: from.to_string(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: all keys are strings and
        // all values are plain JSON.
        serde_json::to_string(self).unwrap_or_default()
    }
}
