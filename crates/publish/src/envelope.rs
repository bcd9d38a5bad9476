use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::format::{FormatterSet, Formats};
use crate::message::Message;

/// Marker byte in front of a JSON item on the queue socket.
pub const QUEUE_JSON_MARKER: u8 = b'J';

/// Per-channel item shipped to a proxy server.
///
/// Bundles every protocol rendering of one message; the proxy picks the
/// slot matching each held connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "prev-id", default, skip_serializing_if = "Option::is_none")]
    pub prev_id: Option<String>,

    pub formats: Formats,
}

impl Envelope {
    /// # Errors
    /// Returns `FormatError` if the channel is empty or any slot fails to render.
    pub fn from_message(message: &Message) -> Result<Self, FormatError> {
        if message.channel().is_empty() {
            return Err(FormatError::EmptyChannel);
        }
        let formats = FormatterSet::for_transports(message.target_transports()).format(message)?;
        Ok(Self {
            channel: message.channel().to_string(),
            id: message.id().map(str::to_string),
            prev_id: message.prev_id().map(str::to_string),
            formats,
        })
    }

    /// Single queue frame: marker byte followed by compact JSON.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_queue_frame(&self) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        let mut frame = BytesMut::with_capacity(json.len() + 1);
        frame.put_u8(QUEUE_JSON_MARKER);
        frame.put_slice(&json);
        Ok(frame.freeze())
    }
}

/// Body of `POST /publish` on a proxy control endpoint.
#[derive(Debug, Serialize)]
pub struct PublishRequest<'a> {
    pub items: [&'a Envelope; 1],
}

impl<'a> PublishRequest<'a> {
    pub fn single(envelope: &'a Envelope) -> Self {
        Self { items: [envelope] }
    }
}

/// Turns a message into the envelope a transport ships.
pub trait EnvelopeSerializer: Send + Sync {
    /// # Errors
    /// Returns `FormatError` if the message cannot be rendered.
    fn serialize(&self, message: &Message) -> Result<Envelope, FormatError>;
}

/// Default serializer applying the transport-driven formatter selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct GripSerializer;

impl EnvelopeSerializer for GripSerializer {
    fn serialize(&self, message: &Message) -> Result<Envelope, FormatError> {
        Envelope::from_message(message)
    }
}
