use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use grip_publish::ConfigurationError;

/// Configuration for the ZeroMQ transport backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZmqTransportConfig {
    /// Keep one socket per server id instead of one per publish.
    pub pool_enabled: bool,
    /// Sends allowed to queue on one socket before new ones fail fast.
    pub send_hwm: usize,
    /// How long closing a socket may wait.
    pub linger_ms: u64,
    pub send_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// First delay after a failed connect; doubles per failure.
    pub reconnect_ivl_ms: u64,
    pub reconnect_ivl_max_ms: u64,
    /// Pool maintenance period. Zero disables the maintenance task.
    pub refresh_interval_ms: u64,
    /// Pooled sockets unused for this long are evicted.
    pub idle_ttl_ms: u64,
    /// Consecutive send failures before a pooled socket is evicted. Zero disables.
    pub max_consecutive_failures: u32,
    pub health_timeout_ms: u64,
}

impl Default for ZmqTransportConfig {
    fn default() -> Self {
        Self {
            pool_enabled: true,
            send_hwm: 1_000,
            linger_ms: 0,
            send_timeout_ms: 1_000,
            connect_timeout_ms: 2_000,
            reconnect_ivl_ms: 100,
            reconnect_ivl_max_ms: 5_000,
            refresh_interval_ms: 30_000,
            idle_ttl_ms: 300_000,
            max_consecutive_failures: 5,
            health_timeout_ms: 2_000,
        }
    }
}

impl ZmqTransportConfig {
    /// # Errors
    /// Returns `ConfigurationError::Invalid` for values no socket can honour.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.send_hwm == 0 || self.send_hwm > Semaphore::MAX_PERMITS {
            return Err(ConfigurationError::Invalid(format!(
                "send_hwm must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                self.send_hwm
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid(
                "send_timeout_ms must be positive".to_string(),
            ));
        }
        if self.reconnect_ivl_max_ms < self.reconnect_ivl_ms {
            return Err(ConfigurationError::Invalid(format!(
                "reconnect_ivl_max_ms ({}) is below reconnect_ivl_ms ({})",
                self.reconnect_ivl_max_ms, self.reconnect_ivl_ms
            )));
        }
        Ok(())
    }

    pub fn socket_params(&self) -> SocketParams {
        SocketParams {
            send_hwm: self.send_hwm,
            linger: Duration::from_millis(self.linger_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_ivl: Duration::from_millis(self.reconnect_ivl_ms),
            reconnect_ivl_max: Duration::from_millis(self.reconnect_ivl_max_ms),
        }
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

/// Per-socket parameters, fixed when the socket is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketParams {
    pub send_hwm: usize,
    pub linger: Duration,
    pub send_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_ivl: Duration,
    pub reconnect_ivl_max: Duration,
}

impl SocketParams {
    /// Delay before the next connect attempt after `failures` consecutive
    /// failed attempts.
    pub fn reconnect_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(16);
        self.reconnect_ivl
            .saturating_mul(1 << shift)
            .min(self.reconnect_ivl_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ZmqTransportConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_hwm() {
        let config = ZmqTransportConfig {
            send_hwm: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_inverted_reconnect_bounds() {
        let config = ZmqTransportConfig {
            reconnect_ivl_ms: 1_000,
            reconnect_ivl_max_ms: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reconnect_delay_doubles_up_to_max() {
        let params = ZmqTransportConfig {
            reconnect_ivl_ms: 100,
            reconnect_ivl_max_ms: 1_000,
            ..Default::default()
        }
        .socket_params();

        assert_eq!(params.reconnect_delay(0), Duration::ZERO);
        assert_eq!(params.reconnect_delay(1), Duration::from_millis(100));
        assert_eq!(params.reconnect_delay(2), Duration::from_millis(200));
        assert_eq!(params.reconnect_delay(4), Duration::from_millis(800));
        assert_eq!(params.reconnect_delay(5), Duration::from_millis(1_000));
        assert_eq!(params.reconnect_delay(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_refresh_disables_maintenance() {
        let config: ZmqTransportConfig =
            serde_json::from_str(r#"{"refresh_interval_ms": 0, "pool_enabled": false}"#).unwrap();
        assert_eq!(config.refresh_interval(), None);
        assert!(!config.pool_enabled);
        assert_eq!(config.send_hwm, 1_000);
    }
}
