use thiserror::Error;

/// A message payload could not be rendered for a protocol family.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("channel must not be empty")]
    EmptyChannel,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport is closed")]
    Closed,

    #[error("reconnect to {server} suppressed for another {remaining:?}")]
    Backoff {
        server: String,
        remaining: std::time::Duration,
    },

    #[error("send queue for {server} is full (hwm {hwm})")]
    QueueFull { server: String, hwm: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Other(String),
}

/// Malformed GRIP WebSocket-over-HTTP input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid size token {token:?} at byte {offset}")]
    InvalidSize { offset: usize, token: String },

    #[error("truncated frame at byte {offset}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("missing CRLF after content at byte {offset}")]
    MissingTrailer { offset: usize },

    #[error("unterminated header line at byte {offset}")]
    IncompleteHeader { offset: usize },

    #[error("invalid control message: {0}")]
    InvalidControl(String),
}

/// Fatal wiring problems detected while assembling the publishing stack.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no publish transport registered")]
    NoTransport,

    #[error("expected exactly one publish transport, found {0}: {1:?}")]
    MultipleTransports(usize, Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
