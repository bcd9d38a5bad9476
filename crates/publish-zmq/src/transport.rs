use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use grip_publish::{
    ConfigurationError, EnvelopeSerializer, GripSerializer, Message, MetricsSink, NoopMetrics,
    ProxyServer, PublishOutcome, ServerRegistry, TransportError, fan_out,
};

use crate::config::ZmqTransportConfig;
use crate::pool::{PrunePolicy, SocketPool};
use crate::socket::{SocketFactory, ZmqSocketFactory};

/// Publishes `J`-prefixed envelope frames to every proxy's PUSH endpoint.
///
/// With pooling on, one socket per server id is reused across publishes
/// and a background task prunes it; with pooling off every send connects
/// a fresh socket and closes it afterwards.
pub struct ZmqTransport {
    pool: Arc<SocketPool>,
    factory: Arc<dyn SocketFactory>,
    registry: Arc<dyn ServerRegistry>,
    serializer: Arc<dyn EnvelopeSerializer>,
    metrics: Arc<dyn MetricsSink>,
    config: ZmqTransportConfig,
    maintenance: CancellationToken,
    maintenance_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ZmqTransport {
    /// # Errors
    /// Returns `ConfigurationError::Invalid` if the config does not validate.
    pub fn new(
        config: ZmqTransportConfig,
        registry: Arc<dyn ServerRegistry>,
    ) -> Result<Self, ConfigurationError> {
        Self::with_factory(config, registry, Arc::new(ZmqSocketFactory))
    }

    /// # Errors
    /// Returns `ConfigurationError::Invalid` if the config does not validate.
    pub fn with_factory(
        config: ZmqTransportConfig,
        registry: Arc<dyn ServerRegistry>,
        factory: Arc<dyn SocketFactory>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            pool: Arc::new(SocketPool::new(factory.clone(), config.socket_params())),
            factory,
            registry,
            serializer: Arc::new(GripSerializer),
            metrics: Arc::new(NoopMetrics),
            config,
            maintenance: CancellationToken::new(),
            maintenance_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn EnvelopeSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn pool(&self) -> &SocketPool {
        &self.pool
    }

    pub fn config(&self) -> &ZmqTransportConfig {
        &self.config
    }

    /// Start the periodic pool maintenance task on the current runtime.
    ///
    /// Returns `false` without spawning when pooling or the refresh
    /// interval is disabled, the transport is closed, or a task is
    /// already running.
    pub fn spawn_maintenance(&self) -> bool {
        let Some(interval) = self.config.refresh_interval() else {
            return false;
        };
        if !self.config.pool_enabled || self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut task = self
            .maintenance_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return false;
        }

        let pool = self.pool.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let policy = self.prune_policy();
        let token = self.maintenance.clone();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        maintain(&pool, registry.as_ref(), policy).await;
                        metrics.active_connections("zmq", pool.len());
                    }
                }
            }
            tracing::debug!("socket pool maintenance stopped");
        }));
        tracing::info!(interval = ?interval, "socket pool maintenance started");
        true
    }

    /// Run one maintenance pass now. Returns the evicted server ids.
    pub async fn run_maintenance(&self) -> Vec<String> {
        let evicted = maintain(&self.pool, self.registry.as_ref(), self.prune_policy()).await;
        self.metrics.active_connections("zmq", self.pool.len());
        evicted
    }

    fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy {
            idle_ttl: std::time::Duration::from_millis(self.config.idle_ttl_ms),
            max_consecutive_failures: self.config.max_consecutive_failures,
        }
    }

    async fn send(&self, server: &ProxyServer, frame: Bytes) -> Result<(), TransportError> {
        if self.config.pool_enabled {
            let socket = self.pool.get_or_create(server).await?;
            let result = socket.send(frame).await;
            let max_failures = self.config.max_consecutive_failures;
            if result.is_err()
                && max_failures > 0
                && socket.consecutive_failures() >= max_failures
                && self.pool.evict_socket(&socket).await
            {
                tracing::info!(
                    server = %server.id,
                    failures = max_failures,
                    "evicted failing socket, next publish reconnects"
                );
            }
            return result;
        }

        let socket = self.pool.open(server).await?;
        let result = socket.send(frame).await;
        socket.close().await;
        result
    }

    async fn send_logged(&self, server: &ProxyServer, frame: Bytes, channel: &str) -> bool {
        match self.send(server, frame).await {
            Ok(()) => {
                tracing::debug!(server = %server.id, channel, "published over zmq");
                true
            }
            Err(e) => {
                tracing::warn!(server = %server.id, channel, "zmq publish failed: {e}");
                false
            }
        }
    }
}

async fn maintain(
    pool: &SocketPool,
    registry: &dyn ServerRegistry,
    policy: PrunePolicy,
) -> Vec<String> {
    let live: HashSet<String> = registry
        .active_servers()
        .await
        .into_iter()
        .map(|server| server.id)
        .collect();
    let evicted = pool.prune(policy, &live).await;
    if !evicted.is_empty() {
        tracing::info!(evicted = ?evicted, remaining = pool.len(), "pruned socket pool");
    }
    evicted
}

#[async_trait]
impl grip_publish::PublishTransport for ZmqTransport {
    async fn publish_outcome(&self, message: &Message) -> PublishOutcome {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(channel = %message.channel(), "zmq transport is closed");
            return PublishOutcome::no_servers();
        }

        let servers = self.registry.active_servers().await;
        if servers.is_empty() {
            tracing::debug!(channel = %message.channel(), "no active proxy servers");
            return PublishOutcome::no_servers();
        }

        let frame = match self
            .serializer
            .serialize(message)
            .map_err(TransportError::from)
            .and_then(|envelope| envelope.to_queue_frame().map_err(TransportError::from))
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %message.channel(), "cannot build queue frame: {e}");
                return PublishOutcome {
                    results: servers.into_iter().map(|s| (s.id, false)).collect(),
                };
            }
        };

        let channel = message.channel();
        let outcome =
            fan_out(&servers, |server| self.send_logged(server, frame.clone(), channel)).await;
        if self.config.pool_enabled {
            self.metrics.active_connections("zmq", self.pool.len());
        }
        outcome
    }

    fn transport_type(&self) -> &'static str {
        "zmq"
    }

    /// Stop maintenance, close pooled sockets, then the shared context.
    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.maintenance.cancel();
        let task = self
            .maintenance_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("maintenance task ended abnormally: {e}");
            }
        }

        self.pool.shutdown().await;
        self.factory.shutdown().await;
        self.metrics.active_connections("zmq", 0);
        tracing::info!("zmq transport shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFactory;
    use grip_publish::{PublishTransport, StaticServerRegistry, TransportKind};
    use std::time::Duration;

    fn server(id: &str) -> ProxyServer {
        ProxyServer::new(id, id)
    }

    fn config(pool_enabled: bool) -> ZmqTransportConfig {
        ZmqTransportConfig {
            pool_enabled,
            reconnect_ivl_ms: 0,
            reconnect_ivl_max_ms: 0,
            ..Default::default()
        }
    }

    fn transport(
        config: ZmqTransportConfig,
        ids: &[&str],
    ) -> (ZmqTransport, Arc<MockFactory>, Arc<StaticServerRegistry>) {
        let factory = MockFactory::new();
        let registry = Arc::new(StaticServerRegistry::new(
            ids.iter().map(|id| server(id)).collect(),
        ));
        let transport =
            ZmqTransport::with_factory(config, registry.clone(), factory.clone()).unwrap();
        (transport, factory, registry)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = ZmqTransportConfig {
            send_hwm: 0,
            ..Default::default()
        };
        let registry = Arc::new(StaticServerRegistry::new(vec![]));
        assert!(matches!(
            ZmqTransport::with_factory(bad, registry, MockFactory::new()),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn sends_queue_frame_to_every_server() {
        let (transport, factory, _) = transport(config(true), &["a", "b"]);
        let msg = Message::new("news", "hi").with_transports([TransportKind::WebSocket]);

        assert!(transport.publish(&msg).await);

        let sent = factory.sent();
        assert_eq!(sent.len(), 2);
        for frame in &sent {
            assert_eq!(frame.frame[0], b'J');
            let body: serde_json::Value = serde_json::from_slice(&frame.frame[1..]).unwrap();
            assert_eq!(body["channel"], "news");
            let ws = body["formats"]["ws-message"]["content"].as_str().unwrap();
            let ws: serde_json::Value = serde_json::from_str(ws).unwrap();
            assert_eq!(ws["data"], "hi");
        }
        let mut hosts: Vec<_> = sent.iter().map(|s| s.host.as_str()).collect();
        hosts.sort_unstable();
        assert_eq!(hosts, ["a", "b"]);
    }

    #[tokio::test]
    async fn pooled_publishes_reuse_one_socket() {
        let (transport, factory, _) = transport(config(true), &["a"]);

        assert!(transport.publish(&Message::new("news", 1)).await);
        assert!(transport.publish(&Message::new("news", 2)).await);

        let sent = factory.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].socket_id, sent[1].socket_id);
        assert_eq!(factory.connects(), 1);
        assert_eq!(factory.closes(), 0);
        assert_eq!(transport.pool().len(), 1);
    }

    #[tokio::test]
    async fn unpooled_publishes_open_and_close_each_time() {
        let (transport, factory, _) = transport(config(false), &["a"]);

        assert!(transport.publish(&Message::new("news", 1)).await);
        assert!(transport.publish(&Message::new("news", 2)).await);

        let sent = factory.sent();
        assert_ne!(sent[0].socket_id, sent[1].socket_id);
        assert_eq!(factory.connects(), 2);
        assert_eq!(factory.closes(), 2);
        assert!(transport.pool().is_empty());
    }

    #[tokio::test]
    async fn unpooled_socket_closed_even_when_send_fails() {
        let (transport, factory, _) = transport(config(false), &["a"]);
        factory.fail_sends("a", true);

        assert!(!transport.publish(&Message::new("news", 1)).await);
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn no_servers_is_failure() {
        let (transport, factory, _) = transport(config(true), &[]);
        let outcome = transport.publish_outcome(&Message::new("news", "hi")).await;
        assert!(outcome.is_empty());
        assert!(!outcome.succeeded());
        assert_eq!(factory.connects(), 0);
    }

    #[tokio::test]
    async fn one_failing_server_fails_publish_but_others_receive() {
        let (transport, factory, _) = transport(config(true), &["a", "b", "c"]);
        factory.refuse("b");

        let outcome = transport.publish_outcome(&Message::new("news", "hi")).await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.failed_servers().collect::<Vec<_>>(), ["b"]);
        assert_eq!(factory.sent().len(), 2);
    }

    #[tokio::test]
    async fn empty_channel_fails_every_server_without_sending() {
        let (transport, factory, _) = transport(config(true), &["a", "b"]);
        let outcome = transport.publish_outcome(&Message::new("", "hi")).await;
        assert_eq!(outcome.failed_servers().count(), 2);
        assert_eq!(factory.connects(), 0);
    }

    #[tokio::test]
    async fn maintenance_evicts_removed_servers() {
        let (transport, factory, registry) = transport(config(true), &["a", "b"]);
        assert!(transport.publish(&Message::new("news", "hi")).await);
        assert_eq!(transport.pool().len(), 2);

        registry.replace(vec![server("b")]).await;
        assert_eq!(transport.run_maintenance().await, vec!["a"]);
        assert_eq!(transport.pool().len(), 1);
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn failing_socket_is_replaced_without_maintenance() {
        let (transport, factory, _) = transport(
            ZmqTransportConfig {
                max_consecutive_failures: 2,
                ..config(true)
            },
            &["a"],
        );
        factory.fail_sends("a", true);
        assert!(!transport.publish(&Message::new("news", 1)).await);
        assert!(transport.pool().contains("a"));
        assert!(!transport.publish(&Message::new("news", 2)).await);
        assert!(!transport.pool().contains("a"));
        assert_eq!(factory.closes(), 1);

        factory.fail_sends("a", false);
        assert!(transport.publish(&Message::new("news", 3)).await);
        assert_eq!(factory.connects(), 2);
        assert_eq!(factory.sent().len(), 1);
    }

    #[tokio::test]
    async fn zero_failure_threshold_keeps_failing_socket() {
        let (transport, factory, _) = transport(
            ZmqTransportConfig {
                max_consecutive_failures: 0,
                ..config(true)
            },
            &["a"],
        );
        factory.fail_sends("a", true);
        for n in 0..4 {
            assert!(!transport.publish(&Message::new("news", n)).await);
        }
        assert!(transport.pool().contains("a"));
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn shutdown_during_connect_closes_late_socket() {
        let (transport, factory, _) = transport(config(true), &["a"]);
        factory.set_connect_delay(Duration::from_millis(100));
        let transport = Arc::new(transport);

        let publish = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.publish(&Message::new("news", "late")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.shutdown().await;

        assert!(!publish.await.unwrap());
        assert_eq!(factory.connects(), 1);
        assert_eq!(factory.closes(), 1);
        assert!(factory.sent().is_empty());
        assert!(factory.is_shut_down());
        assert!(transport.pool().is_empty());
    }

    #[tokio::test]
    async fn spawn_maintenance_respects_config() {
        let (disabled, _, _) = transport(
            ZmqTransportConfig {
                refresh_interval_ms: 0,
                ..config(true)
            },
            &["a"],
        );
        assert!(!disabled.spawn_maintenance());

        let (unpooled, _, _) = transport(config(false), &["a"]);
        assert!(!unpooled.spawn_maintenance());

        let (pooled, _, _) = transport(config(true), &["a"]);
        assert!(pooled.spawn_maintenance());
        assert!(!pooled.spawn_maintenance());
        pooled.shutdown().await;
    }

    #[tokio::test]
    async fn background_maintenance_prunes_idle_sockets() {
        let (transport, _, _) = transport(
            ZmqTransportConfig {
                refresh_interval_ms: 20,
                idle_ttl_ms: 10,
                ..config(true)
            },
            &["a"],
        );
        assert!(transport.publish(&Message::new("news", "hi")).await);
        assert!(transport.spawn_maintenance());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(transport.pool().is_empty());
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_ordered_and_idempotent() {
        let (transport, factory, _) = transport(config(true), &["a", "b"]);
        assert!(transport.publish(&Message::new("news", "hi")).await);
        assert!(transport.spawn_maintenance());

        transport.shutdown().await;
        transport.shutdown().await;

        assert_eq!(factory.closes(), 2);
        assert!(factory.is_shut_down());
        assert!(transport.pool().is_empty());
        assert!(!transport.publish(&Message::new("news", "again")).await);
        assert_eq!(factory.sent().len(), 2);
    }
}
