use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FormatError;
use crate::message::{Message, TransportKind};

/// Frame type a WebSocket client receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSocketKind {
    Text,
    Binary,
}

/// What the proxy does with held connections when the item arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatAction {
    Send,
    Close,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketFormat {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: WebSocketKind,
    pub action: FormatAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStreamFormat {
    pub content: String,
    pub action: FormatAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseFormat {
    pub body: String,
}

/// One rendered representation of a message, per protocol family.
///
/// The envelope slot a value sits in already names the family, so the
/// wire form carries no tag of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormattedContent {
    WebSocket(WebSocketFormat),
    HttpStream(HttpStreamFormat),
    HttpResponse(HttpResponseFormat),
}

impl FormattedContent {
    pub fn slot(&self) -> FormatSlot {
        match self {
            FormattedContent::WebSocket(_) => FormatSlot::WsMessage,
            FormattedContent::HttpStream(_) => FormatSlot::HttpStream,
            FormattedContent::HttpResponse(_) => FormatSlot::HttpResponse,
        }
    }
}

/// Canonical envelope keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatSlot {
    WsMessage,
    HttpStream,
    HttpResponse,
}

impl FormatSlot {
    pub const ALL: [FormatSlot; 3] = [
        FormatSlot::WsMessage,
        FormatSlot::HttpStream,
        FormatSlot::HttpResponse,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FormatSlot::WsMessage => "ws-message",
            FormatSlot::HttpStream => "http-stream",
            FormatSlot::HttpResponse => "http-response",
        }
    }
}

/// Renders the whole message as compact JSON for a text frame.
///
/// # Errors
/// Returns `FormatError` if the message cannot be serialized.
pub fn websocket(message: &Message) -> Result<WebSocketFormat, FormatError> {
    Ok(WebSocketFormat {
        content: serde_json::to_string(message)?,
        kind: WebSocketKind::Text,
        action: FormatAction::Send,
    })
}

/// Renderer for the `http-stream` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormatter {
    /// `event:`/`data:` Server-Sent-Event framing.
    Sse,
    /// Payload followed by a single newline.
    Raw,
}

impl StreamFormatter {
    /// # Errors
    /// Returns `FormatError` if a non-string payload cannot be serialized.
    pub fn format(self, message: &Message) -> Result<HttpStreamFormat, FormatError> {
        let payload = payload_text(message.data())?;
        let content = match self {
            StreamFormatter::Sse => {
                let mut content = String::with_capacity(payload.len() + 16);
                if let Some(event) = message.event_type() {
                    content.push_str("event: ");
                    content.push_str(event);
                    content.push('\n');
                }
                content.push_str("data: ");
                content.push_str(&payload);
                content.push_str("\n\n");
                content
            }
            StreamFormatter::Raw => {
                let mut content = payload;
                content.push('\n');
                content
            }
        };
        Ok(HttpStreamFormat {
            content,
            action: FormatAction::Send,
        })
    }
}

/// Renderer for the `http-response` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormatter {
    /// Payload as JSON, no trailing newline.
    Plain,
    /// `{"channel":..,"message":..}` line for long-polling clients.
    LongPolling,
}

impl ResponseFormatter {
    /// # Errors
    /// Returns `FormatError` if the payload cannot be serialized.
    pub fn format(self, message: &Message) -> Result<HttpResponseFormat, FormatError> {
        let body = match self {
            ResponseFormatter::Plain => serde_json::to_string(message.data())?,
            ResponseFormatter::LongPolling => {
                #[derive(Serialize)]
                struct LongPollBody<'a> {
                    channel: &'a str,
                    message: String,
                }

                let mut body = serde_json::to_string(&LongPollBody {
                    channel: message.channel(),
                    message: payload_text(message.data())?,
                })?;
                body.push('\n');
                body
            }
        };
        Ok(HttpResponseFormat { body })
    }
}

/// The renderers chosen for one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatterSet {
    pub http_stream: StreamFormatter,
    pub http_response: ResponseFormatter,
}

impl FormatterSet {
    /// `LongPolling` swaps the response slot to the long-polling renderer,
    /// `HttpStream` swaps the stream slot to the raw renderer; otherwise
    /// SSE and plain HTTP response are used.
    pub fn for_transports(transports: &BTreeSet<TransportKind>) -> Self {
        let http_stream = if transports.contains(&TransportKind::HttpStream) {
            StreamFormatter::Raw
        } else {
            StreamFormatter::Sse
        };
        let http_response = if transports.contains(&TransportKind::LongPolling) {
            ResponseFormatter::LongPolling
        } else {
            ResponseFormatter::Plain
        };
        Self {
            http_stream,
            http_response,
        }
    }

    /// # Errors
    /// Returns the first `FormatError` raised by any slot renderer.
    pub fn format(&self, message: &Message) -> Result<Formats, FormatError> {
        Ok(Formats {
            ws_message: websocket(message)?,
            http_stream: self.http_stream.format(message)?,
            http_response: self.http_response.format(message)?,
        })
    }
}

/// All three slots of an envelope, always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formats {
    #[serde(rename = "ws-message")]
    pub ws_message: WebSocketFormat,
    #[serde(rename = "http-stream")]
    pub http_stream: HttpStreamFormat,
    #[serde(rename = "http-response")]
    pub http_response: HttpResponseFormat,
}

impl Formats {
    pub fn get(&self, slot: FormatSlot) -> FormattedContent {
        match slot {
            FormatSlot::WsMessage => FormattedContent::WebSocket(self.ws_message.clone()),
            FormatSlot::HttpStream => FormattedContent::HttpStream(self.http_stream.clone()),
            FormatSlot::HttpResponse => FormattedContent::HttpResponse(self.http_response.clone()),
        }
    }
}

/// String payloads pass through verbatim, anything else becomes compact JSON.
fn payload_text(data: &Value) -> Result<String, serde_json::Error> {
    match data {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sse_string_payload_is_not_requoted() {
        let msg = Message::new("c", "hi");
        let f = StreamFormatter::Sse.format(&msg).unwrap();
        assert_eq!(f.content, "data: hi\n\n");
        assert_eq!(f.action, FormatAction::Send);
    }

    #[test]
    fn sse_with_event_type_and_object_payload() {
        let msg = Message::new("c", json!({"a": 1})).with_event_type("update");
        let f = StreamFormatter::Sse.format(&msg).unwrap();
        assert_eq!(f.content, "event: update\ndata: {\"a\":1}\n\n");
    }

    #[test]
    fn raw_stream_appends_single_newline() {
        let msg = Message::new("c", "hi").with_event_type("ignored");
        let f = StreamFormatter::Raw.format(&msg).unwrap();
        assert_eq!(f.content, "hi\n");
    }

    #[test]
    fn long_polling_wraps_channel_and_message() {
        let msg = Message::new("room", json!([1, 2]));
        let f = ResponseFormatter::LongPolling.format(&msg).unwrap();
        assert_eq!(f.body, "{\"channel\":\"room\",\"message\":\"[1,2]\"}\n");
    }

    #[test]
    fn http_response_is_json_without_newline() {
        let msg = Message::new("c", "hi");
        let f = ResponseFormatter::Plain.format(&msg).unwrap();
        assert_eq!(f.body, "\"hi\"");
    }

    #[test]
    fn websocket_carries_whole_message() {
        let msg = Message::new("c", json!({"k": "v"}));
        let ws = websocket(&msg).unwrap();
        assert_eq!(ws.content, r#"{"channel":"c","data":{"k":"v"}}"#);
        assert_eq!(ws.kind, WebSocketKind::Text);
        assert_eq!(ws.action, FormatAction::Send);
    }

    #[test]
    fn websocket_format_wire_names() {
        let ws = WebSocketFormat {
            content: "x".into(),
            kind: WebSocketKind::Text,
            action: FormatAction::Send,
        };
        assert_eq!(
            serde_json::to_value(&ws).unwrap(),
            json!({"content": "x", "type": "text", "action": "send"})
        );
    }

    #[test]
    fn formatter_selection_without_overrides() {
        let set = FormatterSet::for_transports(&BTreeSet::from([TransportKind::WebSocket]));
        assert_eq!(set.http_stream, StreamFormatter::Sse);
        assert_eq!(set.http_response, ResponseFormatter::Plain);
    }

    #[test]
    fn formatter_selection_overrides() {
        let set = FormatterSet::for_transports(&BTreeSet::from([
            TransportKind::HttpStream,
            TransportKind::LongPolling,
        ]));
        assert_eq!(set.http_stream, StreamFormatter::Raw);
        assert_eq!(set.http_response, ResponseFormatter::LongPolling);
    }

    #[test]
    fn default_transports_select_long_polling() {
        let set = FormatterSet::for_transports(&TransportKind::defaults());
        assert_eq!(set.http_stream, StreamFormatter::Sse);
        assert_eq!(set.http_response, ResponseFormatter::LongPolling);
    }

    #[test]
    fn formats_expose_every_slot() {
        let msg = Message::new("c", "hi");
        let formats = FormatterSet::for_transports(msg.target_transports())
            .format(&msg)
            .unwrap();
        for slot in FormatSlot::ALL {
            assert_eq!(formats.get(slot).slot(), slot);
        }
        let json = serde_json::to_value(&formats).unwrap();
        assert!(json.get("ws-message").is_some());
        assert!(json.get("http-stream").is_some());
        assert!(json.get("http-response").is_some());
    }
}
