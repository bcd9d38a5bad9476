//! GRIP WebSocket-over-HTTP framing.
//!
//! The proxy speaks this framing natively, so encoding must stay byte-exact:
//! `TYPE[ hex-size]\r\n[content]\r\n` per event.

mod control;
mod event;

pub use control::ControlMessage;
pub use event::{EventType, WebSocketEvent, decode, decode_strict, encode};
