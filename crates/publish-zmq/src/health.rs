use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

use grip_publish::{ProxyServer, TransportError};

use crate::config::ZmqTransportConfig;

/// A proxy is healthy when its publish port accepts a TCP connection
/// within the timeout.
pub struct ZmqHealthChecker {
    timeout: Duration,
}

impl ZmqHealthChecker {
    pub fn new(config: &ZmqTransportConfig) -> Self {
        Self {
            timeout: config.health_timeout(),
        }
    }
}

#[async_trait]
impl grip_publish::HealthChecker for ZmqHealthChecker {
    async fn check_health(&self, server: &ProxyServer) -> Result<bool, TransportError> {
        let addr = (server.host.as_str(), server.publish_port);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| {
                TransportError::Connection(format!("{}: {e}", server.publish_endpoint()))
            })?;
        drop(stream);
        Ok(true)
    }

    fn transport_type(&self) -> &'static str {
        "zmq"
    }
}
