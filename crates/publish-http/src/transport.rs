use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use grip_publish::{
    EnvelopeSerializer, GripSerializer, Message, ProxyServer, PublishOutcome, PublishRequest,
    ServerRegistry, TransportError, fan_out,
};

use crate::config::HttpTransportConfig;
use crate::error::map_reqwest_err;

/// Publishes by POSTing to each proxy's control API.
///
/// Stateless apart from the shared connection pool inside the HTTP
/// client; every publish resolves the server set afresh.
pub struct HttpTransport {
    client: reqwest::Client,
    registry: Arc<dyn ServerRegistry>,
    serializer: Arc<dyn EnvelopeSerializer>,
    publish_timeout: Duration,
    closed: AtomicBool,
}

impl HttpTransport {
    /// # Errors
    /// Returns `TransportError::Connection` if the HTTP client cannot be built.
    pub fn new(
        config: &HttpTransportConfig,
        registry: Arc<dyn ServerRegistry>,
    ) -> Result<Self, TransportError> {
        let client = config
            .client()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            registry,
            serializer: Arc::new(GripSerializer),
            publish_timeout: config.publish_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn EnvelopeSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    async fn send(&self, server: &ProxyServer, body: Bytes) -> Result<(), TransportError> {
        let request = self
            .client
            .post(server.publish_url())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        let response = tokio::time::timeout(self.publish_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(self.publish_timeout))?
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Publish(format!("proxy answered {status}")));
        }
        Ok(())
    }

    async fn send_logged(&self, server: &ProxyServer, body: Bytes, channel: &str) -> bool {
        match self.send(server, body).await {
            Ok(()) => {
                tracing::debug!(server = %server.id, channel, "published over http");
                true
            }
            Err(e) => {
                tracing::warn!(server = %server.id, channel, "http publish failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl grip_publish::PublishTransport for HttpTransport {
    async fn publish_outcome(&self, message: &Message) -> PublishOutcome {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(channel = %message.channel(), "http transport is closed");
            return PublishOutcome::no_servers();
        }

        let servers = self.registry.active_servers().await;
        if servers.is_empty() {
            tracing::debug!(channel = %message.channel(), "no active proxy servers");
            return PublishOutcome::no_servers();
        }

        let body = match self
            .serializer
            .serialize(message)
            .map_err(TransportError::from)
            .and_then(|envelope| {
                serde_json::to_vec(&PublishRequest::single(&envelope)).map_err(TransportError::from)
            }) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                tracing::warn!(channel = %message.channel(), "cannot build publish body: {e}");
                return PublishOutcome {
                    results: servers.into_iter().map(|s| (s.id, false)).collect(),
                };
            }
        };

        let channel = message.channel();
        fan_out(&servers, |server| self.send_logged(server, body.clone(), channel)).await
    }

    fn transport_type(&self) -> &'static str {
        "http"
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("http transport closed");
        }
    }
}
