use std::time::Duration;

use serde::Deserialize;

/// Configuration for the HTTP transport backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Upper bound for one `POST /publish` call, per server.
    pub publish_timeout_ms: u64,
    /// Upper bound for one health probe.
    pub health_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 5_000,
            health_timeout_ms: 2_000,
            user_agent: concat!("grip-publish/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpTransportConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub(crate) fn client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .build()
    }
}
