use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Open,
    Text,
    Binary,
    Ping,
    Pong,
    Close,
    Disconnect,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Open => "OPEN",
            EventType::Text => "TEXT",
            EventType::Binary => "BINARY",
            EventType::Ping => "PING",
            EventType::Pong => "PONG",
            EventType::Close => "CLOSE",
            EventType::Disconnect => "DISCONNECT",
        }
    }

    fn from_token(token: &[u8]) -> Option<Self> {
        Some(match token {
            b"OPEN" => EventType::Open,
            b"TEXT" => EventType::Text,
            b"BINARY" => EventType::Binary,
            b"PING" => EventType::Ping,
            b"PONG" => EventType::Pong,
            b"CLOSE" => EventType::Close,
            b"DISCONNECT" => EventType::Disconnect,
            _ => return None,
        })
    }

    /// Whether frames of this type may carry a size and content.
    pub fn carries_content(self) -> bool {
        matches!(self, EventType::Text | EventType::Binary | EventType::Close)
    }
}

/// One WebSocket-over-HTTP event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketEvent {
    pub kind: EventType,
    pub content: Bytes,
}

impl WebSocketEvent {
    pub fn new(kind: EventType, content: impl Into<Bytes>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn empty(kind: EventType) -> Self {
        Self::new(kind, Bytes::new())
    }

    pub fn open() -> Self {
        Self::empty(EventType::Open)
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(EventType::Text, Bytes::from(content.into()))
    }

    pub fn binary(content: impl Into<Bytes>) -> Self {
        Self::new(EventType::Binary, content)
    }

    pub fn ping() -> Self {
        Self::empty(EventType::Ping)
    }

    pub fn pong() -> Self {
        Self::empty(EventType::Pong)
    }

    /// CLOSE with a big-endian status code and optional reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut buf = BytesMut::with_capacity(2 + reason.len());
        buf.put_u16(code);
        buf.put_slice(reason.as_bytes());
        Self::new(EventType::Close, buf.freeze())
    }

    pub fn disconnect() -> Self {
        Self::empty(EventType::Disconnect)
    }

    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Status code of a CLOSE event, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        if self.kind != EventType::Close || self.content.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.content[0], self.content[1]]))
    }
}

/// Renders events as `TYPE[ hex-size]\r\n[content]\r\n`, concatenated.
///
/// Control-only types are always written bare; content on them is dropped.
pub fn encode(events: &[WebSocketEvent]) -> Bytes {
    let mut out = BytesMut::new();
    let mut header = String::new();
    for event in events {
        header.clear();
        header.push_str(event.kind.as_str());
        if event.kind.carries_content() && !event.content.is_empty() {
            let _ = write!(header, " {:x}", event.content.len());
            out.put_slice(header.as_bytes());
            out.put_slice(CRLF);
            out.put_slice(&event.content);
        } else {
            out.put_slice(header.as_bytes());
        }
        out.put_slice(CRLF);
    }
    out.freeze()
}

/// Lenient decode: returns every event parsed before the first framing
/// violation. Unknown type lines are skipped. Never fails.
pub fn decode(input: &[u8]) -> Vec<WebSocketEvent> {
    parse(input).0
}

/// Strict decode: same grammar, but reports the first framing violation.
///
/// # Errors
/// Returns `ProtocolError` describing where the input stopped being valid.
pub fn decode_strict(input: &[u8]) -> Result<Vec<WebSocketEvent>, ProtocolError> {
    match parse(input) {
        (events, None) => Ok(events),
        (_, Some(err)) => Err(err),
    }
}

fn parse(input: &[u8]) -> (Vec<WebSocketEvent>, Option<ProtocolError>) {
    let mut events = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let Some(line_len) = find_crlf(&input[pos..]) else {
            return (events, Some(ProtocolError::IncompleteHeader { offset: pos }));
        };
        let line = &input[pos..pos + line_len];
        let body_start = pos + line_len + CRLF.len();

        let (type_token, size_token) = match line.iter().position(|&b| b == b' ') {
            Some(space) => (&line[..space], Some(&line[space + 1..])),
            None => (line, None),
        };

        let Some(kind) = EventType::from_token(type_token) else {
            tracing::trace!(offset = pos, "skipping unknown event line");
            pos = body_start;
            continue;
        };

        let Some(size_token) = size_token else {
            events.push(WebSocketEvent::empty(kind));
            pos = body_start;
            continue;
        };

        let Some(size) = parse_hex(size_token) else {
            let token = String::from_utf8_lossy(size_token).into_owned();
            return (events, Some(ProtocolError::InvalidSize { offset: pos, token }));
        };

        let Some(body_end) = body_start.checked_add(size) else {
            let token = String::from_utf8_lossy(size_token).into_owned();
            return (events, Some(ProtocolError::InvalidSize { offset: pos, token }));
        };
        let needed = size.saturating_add(CRLF.len());
        if input.len() < body_end.saturating_add(CRLF.len()) {
            let available = input.len() - body_start;
            return (
                events,
                Some(ProtocolError::Truncated {
                    offset: body_start,
                    needed,
                    available,
                }),
            );
        }
        if &input[body_end..body_end + CRLF.len()] != CRLF {
            return (events, Some(ProtocolError::MissingTrailer { offset: body_end }));
        }

        if kind.carries_content() {
            events.push(WebSocketEvent::new(
                kind,
                Bytes::copy_from_slice(&input[body_start..body_end]),
            ));
        } else {
            // control-only types never carry a body; the frame is consumed
            tracing::trace!(offset = pos, kind = kind.as_str(), "dropping content on bare event");
            events.push(WebSocketEvent::empty(kind));
        }
        pos = body_end + CRLF.len();
    }

    (events, None)
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).position(|w| w == CRLF)
}

fn parse_hex(token: &[u8]) -> Option<usize> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(token).ok()?;
    usize::from_str_radix(text, 16).ok()
}
