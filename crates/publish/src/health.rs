use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::join_all;
use serde::Deserialize;

use crate::error::TransportError;
use crate::server::{ProxyServer, ServerRegistry};

/// Liveness probe for one transport family.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_health(&self, server: &ProxyServer) -> Result<bool, TransportError>;

    /// Name matched against the configured active transport.
    fn transport_type(&self) -> &'static str;

    /// Probe every server concurrently. A failing or panicking probe marks
    /// only its own server unhealthy.
    async fn check_all_servers(&self, servers: &[ProxyServer]) -> HashMap<String, bool> {
        let probes = servers.iter().map(|server| {
            let probe = AssertUnwindSafe(self.check_health(server)).catch_unwind();
            async move {
                let healthy = match probe.await {
                    Ok(Ok(healthy)) => healthy,
                    Ok(Err(e)) => {
                        tracing::warn!(server = %server.id, "health check failed: {e}");
                        false
                    }
                    Err(_) => {
                        tracing::error!(server = %server.id, "health check panicked");
                        false
                    }
                };
                (server.id.clone(), healthy)
            }
        });
        join_all(probes).await.into_iter().collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Transport type whose checker is consulted, e.g. `http` or `zmq`.
    pub active_transport: String,
    /// How long a probe result is reused. Zero disables caching.
    pub cache_ttl_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            active_transport: "http".to_string(),
            cache_ttl_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedHealth {
    healthy: bool,
    checked_at: Instant,
}

/// Routes health questions to the checker of the active transport and
/// caches the answers.
pub struct HealthMonitor {
    checkers: Vec<Arc<dyn HealthChecker>>,
    active_transport: String,
    cache_ttl: Duration,
    cache: DashMap<String, CachedHealth>,
}

impl HealthMonitor {
    pub fn new(checkers: Vec<Arc<dyn HealthChecker>>, config: HealthConfig) -> Self {
        let monitor = Self {
            checkers,
            active_transport: config.active_transport,
            cache_ttl: Duration::from_millis(config.cache_ttl_ms),
            cache: DashMap::new(),
        };
        match monitor.active_checker() {
            Some(checker) if checker.transport_type() != monitor.active_transport => {
                tracing::warn!(
                    wanted = %monitor.active_transport,
                    using = checker.transport_type(),
                    "no health checker for active transport, falling back to first registered"
                );
            }
            None => tracing::warn!("no health checkers registered, all servers report unhealthy"),
            _ => {}
        }
        monitor
    }

    /// Checker matching the active transport, else the first registered one.
    pub fn active_checker(&self) -> Option<&Arc<dyn HealthChecker>> {
        self.checkers
            .iter()
            .find(|c| c.transport_type() == self.active_transport)
            .or_else(|| self.checkers.first())
    }

    pub fn active_checker_type(&self) -> Option<&'static str> {
        self.active_checker().map(|c| c.transport_type())
    }

    pub async fn check_health(&self, server: &ProxyServer) -> bool {
        if let Some(healthy) = self.cached(&server.id) {
            return healthy;
        }
        let Some(checker) = self.active_checker() else {
            return false;
        };

        let healthy = match AssertUnwindSafe(checker.check_health(server))
            .catch_unwind()
            .await
        {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                tracing::warn!(server = %server.id, "health check failed: {e}");
                false
            }
            Err(_) => {
                tracing::error!(server = %server.id, "health check panicked");
                false
            }
        };
        self.store(&server.id, healthy);
        healthy
    }

    /// One entry per server, cached results reused.
    pub async fn check_all_servers(&self, servers: &[ProxyServer]) -> HashMap<String, bool> {
        let Some(checker) = self.active_checker() else {
            return servers.iter().map(|s| (s.id.clone(), false)).collect();
        };

        let mut results = HashMap::with_capacity(servers.len());
        let mut stale = Vec::new();
        for server in servers {
            match self.cached(&server.id) {
                Some(healthy) => {
                    results.insert(server.id.clone(), healthy);
                }
                None => stale.push(server.clone()),
            }
        }

        if !stale.is_empty() {
            let probed = checker.check_all_servers(&stale).await;
            for server in &stale {
                let healthy = probed.get(&server.id).copied().unwrap_or(false);
                self.store(&server.id, healthy);
                results.insert(server.id.clone(), healthy);
            }
        }
        results
    }

    /// Active servers from the registry that currently pass their probe.
    pub async fn healthy_servers(&self, registry: &dyn ServerRegistry) -> Vec<ProxyServer> {
        let servers = registry.active_servers().await;
        let health = self.check_all_servers(&servers).await;
        servers
            .into_iter()
            .filter(|s| health.get(&s.id).copied().unwrap_or(false))
            .collect()
    }

    /// Fresh cached result for a server, if any.
    pub fn cached(&self, server_id: &str) -> Option<bool> {
        let entry = self.cache.get(server_id)?;
        (entry.checked_at.elapsed() < self.cache_ttl).then_some(entry.healthy)
    }

    pub fn invalidate(&self, server_id: &str) {
        self.cache.remove(server_id);
    }

    fn store(&self, server_id: &str, healthy: bool) {
        if self.cache_ttl.is_zero() {
            return;
        }
        self.cache.insert(
            server_id.to_string(),
            CachedHealth {
                healthy,
                checked_at: Instant::now(),
            },
        );
    }
}
