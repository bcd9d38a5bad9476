use serde::{Deserialize, Serialize};

use super::event::{EventType, WebSocketEvent};
use crate::error::ProtocolError;

const CONTROL_PREFIX: &str = "c:";

/// Instruction from the application to the proxy, carried in-band on a
/// WebSocket-over-HTTP connection as a `c:`-prefixed TEXT event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Detach,
    KeepAlive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Seconds between keep-alive frames.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u32>,
    },
}

impl ControlMessage {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ControlMessage::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ControlMessage::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_event(&self) -> Result<WebSocketEvent, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(WebSocketEvent::text(format!("{CONTROL_PREFIX}{json}")))
    }

    /// `Ok(None)` for anything that is not a control event.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidControl` for a `c:` TEXT event whose
    /// body is not a known control message.
    pub fn from_event(event: &WebSocketEvent) -> Result<Option<Self>, ProtocolError> {
        if event.kind != EventType::Text {
            return Ok(None);
        }
        let Some(body) = event.content.strip_prefix(CONTROL_PREFIX.as_bytes()) else {
            return Ok(None);
        };
        serde_json::from_slice(body)
            .map(Some)
            .map_err(|e| ProtocolError::InvalidControl(e.to_string()))
    }
}
