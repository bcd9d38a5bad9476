use async_trait::async_trait;
use std::time::Duration;

use grip_publish::{ProxyServer, TransportError};

use crate::config::HttpTransportConfig;
use crate::error::map_reqwest_err;

/// Probes a proxy with `GET {control_url}{health_path}`.
///
/// Any response that arrives before the timeout counts as healthy; the
/// status code is only logged.
pub struct HttpHealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthChecker {
    /// # Errors
    /// Returns `TransportError::Connection` if the HTTP client cannot be built.
    pub fn new(config: &HttpTransportConfig) -> Result<Self, TransportError> {
        let client = config
            .client()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            timeout: config.health_timeout(),
        })
    }
}

#[async_trait]
impl grip_publish::HealthChecker for HttpHealthChecker {
    async fn check_health(&self, server: &ProxyServer) -> Result<bool, TransportError> {
        let probe = self.client.get(server.health_url()).send();
        let response = tokio::time::timeout(self.timeout, probe)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(map_reqwest_err)?;

        tracing::trace!(server = %server.id, status = %response.status(), "health probe answered");
        Ok(true)
    }

    fn transport_type(&self) -> &'static str {
        "http"
    }
}
