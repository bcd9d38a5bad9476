use std::sync::Arc;
use std::time::Instant;

use crate::error::ConfigurationError;
use crate::message::Message;
use crate::sink::{AuditSink, MetricsSink, NoopAudit, NoopMetrics};
use crate::transport::{PublishOutcome, PublishTransport};

/// Entry point for application code publishing to the proxy fleet.
///
/// Holds the single active transport plus the metrics and audit sinks,
/// and records both around every publish.
pub struct Publisher {
    transport: Arc<dyn PublishTransport>,
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<dyn AuditSink>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn PublishTransport>) -> Self {
        Self {
            transport,
            metrics: Arc::new(NoopMetrics),
            audit: Arc::new(NoopAudit),
        }
    }

    /// Build from every registered transport; exactly one must be present.
    ///
    /// # Errors
    /// Returns `ConfigurationError` when zero or several transports are given.
    pub fn from_transports(
        mut transports: Vec<Arc<dyn PublishTransport>>,
    ) -> Result<Self, ConfigurationError> {
        match transports.len() {
            0 => Err(ConfigurationError::NoTransport),
            1 => Ok(Self::new(transports.remove(0))),
            n => Err(ConfigurationError::MultipleTransports(
                n,
                transports
                    .iter()
                    .map(|t| t.transport_type().to_string())
                    .collect(),
            )),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn transport(&self) -> &Arc<dyn PublishTransport> {
        &self.transport
    }

    pub async fn publish(&self, message: &Message) -> bool {
        self.publish_outcome(message).await.succeeded()
    }

    pub async fn publish_outcome(&self, message: &Message) -> PublishOutcome {
        let transport = self.transport.transport_type();
        self.audit.channel_access(message.channel(), "publish");

        let started = Instant::now();
        let outcome = self.transport.publish_outcome(message).await;
        self.metrics.publish_latency(transport, started.elapsed());

        if outcome.succeeded() {
            self.metrics.message_sent(transport, message.channel());
        } else {
            self.metrics.message_failed(transport, message.channel());
            tracing::warn!(
                channel = %message.channel(),
                transport,
                servers = outcome.len(),
                failed = ?outcome.failed_servers().collect::<Vec<_>>(),
                "publish did not reach every server"
            );
        }
        outcome
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}
