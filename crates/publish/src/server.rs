use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A proxy instance messages are published to.
///
/// Owned by the registry. Transports only ever hold snapshots and look
/// servers up again by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyServer {
    pub id: String,
    pub host: String,

    /// Client-facing HTTP port.
    #[serde(default = "defaults::http_port")]
    pub http_port: u16,

    /// Control API port, serving `POST /publish`.
    #[serde(default = "defaults::control_port")]
    pub control_port: u16,

    /// Queue socket port accepting pushed items.
    #[serde(default = "defaults::publish_port")]
    pub publish_port: u16,

    #[serde(default = "defaults::active")]
    pub active: bool,

    #[serde(default = "defaults::weight")]
    pub weight: u32,

    /// Path probed by the HTTP health checker, relative to the control URL.
    #[serde(default = "defaults::health_path")]
    pub health_path: String,
}

mod defaults {
    pub fn http_port() -> u16 {
        7999
    }

    pub fn control_port() -> u16 {
        5561
    }

    pub fn publish_port() -> u16 {
        5560
    }

    pub fn active() -> bool {
        true
    }

    pub fn weight() -> u32 {
        1
    }

    pub fn health_path() -> String {
        "/".to_string()
    }
}

impl ProxyServer {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            http_port: defaults::http_port(),
            control_port: defaults::control_port(),
            publish_port: defaults::publish_port(),
            active: defaults::active(),
            weight: defaults::weight(),
            health_path: defaults::health_path(),
        }
    }

    #[must_use]
    pub fn with_ports(mut self, http: u16, control: u16, publish: u16) -> Self {
        self.http_port = http;
        self.control_port = control;
        self.publish_port = publish;
        self
    }

    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    #[must_use]
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// `http://host:control_port`
    pub fn control_url(&self) -> String {
        format!("http://{}:{}", self.host, self.control_port)
    }

    pub fn publish_url(&self) -> String {
        format!("{}/publish", self.control_url())
    }

    pub fn health_url(&self) -> String {
        if self.health_path.starts_with('/') {
            format!("{}{}", self.control_url(), self.health_path)
        } else {
            format!("{}/{}", self.control_url(), self.health_path)
        }
    }

    /// `tcp://host:publish_port`
    pub fn publish_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.publish_port)
    }
}

/// Source of the current proxy server set.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn all_servers(&self) -> Vec<ProxyServer>;

    async fn server_by_id(&self, id: &str) -> Option<ProxyServer> {
        self.all_servers().await.into_iter().find(|s| s.id == id)
    }

    async fn active_servers(&self) -> Vec<ProxyServer> {
        self.all_servers()
            .await
            .into_iter()
            .filter(|s| s.active)
            .collect()
    }
}

/// Fixed, replaceable server list.
#[derive(Debug, Default)]
pub struct StaticServerRegistry {
    servers: RwLock<Vec<ProxyServer>>,
}

impl StaticServerRegistry {
    pub fn new(servers: Vec<ProxyServer>) -> Self {
        Self {
            servers: RwLock::new(servers),
        }
    }

    pub async fn replace(&self, servers: Vec<ProxyServer>) {
        *self.servers.write().await = servers;
    }
}

#[async_trait]
impl ServerRegistry for StaticServerRegistry {
    async fn all_servers(&self) -> Vec<ProxyServer> {
        self.servers.read().await.clone()
    }
}
