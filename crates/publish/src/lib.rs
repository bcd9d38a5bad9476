//! Turns transport-agnostic messages into GRIP proxy publish items and
//! defines the seams concrete transports plug into.

mod envelope;
mod error;
pub mod format;
pub mod grip;
mod health;
mod message;
mod publisher;
mod server;
mod sink;
mod transport;

pub use envelope::{
    Envelope, EnvelopeSerializer, GripSerializer, PublishRequest, QUEUE_JSON_MARKER,
};
pub use error::{ConfigurationError, FormatError, ProtocolError, TransportError};
pub use format::{FormatSlot, FormattedContent, Formats, FormatterSet};
pub use health::{HealthChecker, HealthConfig, HealthMonitor};
pub use message::{Message, TransportKind};
pub use publisher::Publisher;
pub use server::{ProxyServer, ServerRegistry, StaticServerRegistry};
pub use sink::{AuditSink, MetricsSink, NoopAudit, NoopMetrics, TracingAudit};
pub use transport::{PublishOutcome, PublishTransport, fan_out};
