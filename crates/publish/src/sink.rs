//! Fire-and-forget observability hooks. Implementations must not block
//! and must not panic; they run inline on the publish path.

use std::time::Duration;

pub trait MetricsSink: Send + Sync {
    fn message_sent(&self, _transport: &str, _channel: &str) {}

    fn message_failed(&self, _transport: &str, _channel: &str) {}

    fn publish_latency(&self, _transport: &str, _elapsed: Duration) {}

    /// Number of live outbound connections held by a transport.
    fn active_connections(&self, _transport: &str, _count: usize) {}
}

pub trait AuditSink: Send + Sync {
    fn channel_access(&self, channel: &str, action: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn channel_access(&self, _channel: &str, _action: &str) {}
}

/// Writes audit records as `tracing` events under the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn channel_access(&self, channel: &str, action: &str) {
        tracing::info!(target: "audit", channel, action, "channel access");
    }
}
