//! Session configuration.

use std::time::Duration;

use super::constants::*;
use super::error::ConfigError;

/// Tunable parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NetConfig {
    /// Largest datagram handed to the transport.
    pub max_datagram_size: usize,

    /// Bytes reserved for the fragment envelope.
    pub fragment_header_reserve: usize,

    /// Upper bound on fragments per message accepted from the wire.
    pub max_fragments_per_message: u32,

    /// Open reassembly buffers before the oldest is evicted.
    pub max_pending_reassemblies: usize,

    /// Incomplete messages are dropped after this long.
    pub reassembly_timeout: Duration,

    /// Client heartbeat interval.
    pub ping_interval: Duration,

    /// Time allowed to reach `Connected`.
    pub handshake_timeout: Duration,

    /// Silence tolerated once connected.
    pub disconnect_timeout: Duration,

    /// EMA weight of the newest latency sample, in `(0, 1]`.
    pub latency_alpha: f64,

    /// Interval between missing-object re-requests.
    pub missing_object_retry_interval: Duration,

    /// Requests per missing object before giving up. `None` retries forever.
    pub missing_object_max_attempts: Option<u32>,

    /// Scene sync request is re-sent after this long without an answer.
    pub scene_sync_retry_interval: Duration,

    /// Sleep between transport polls.
    pub recv_poll_interval: Duration,

    /// Sleep between peer directory polls (authority).
    pub peer_poll_interval: Duration,

    /// Sync interval for components that do not set their own.
    pub default_sync_interval: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            fragment_header_reserve: DEFAULT_FRAGMENT_HEADER_RESERVE,
            max_fragments_per_message: DEFAULT_MAX_FRAGMENTS_PER_MESSAGE,
            max_pending_reassemblies: DEFAULT_MAX_PENDING_REASSEMBLIES,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            latency_alpha: DEFAULT_LATENCY_ALPHA,
            missing_object_retry_interval: DEFAULT_MISSING_OBJECT_RETRY_INTERVAL,
            missing_object_max_attempts: Some(DEFAULT_MISSING_OBJECT_MAX_ATTEMPTS),
            scene_sync_retry_interval: DEFAULT_SCENE_SYNC_RETRY_INTERVAL,
            recv_poll_interval: DEFAULT_RECV_POLL_INTERVAL,
            peer_poll_interval: DEFAULT_PEER_POLL_INTERVAL,
            default_sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl NetConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> NetConfigBuilder {
        NetConfigBuilder::new()
    }

    /// Check that the parameters are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_datagram_size <= self.fragment_header_reserve + 4 {
            return Err(ConfigError::DatagramTooSmall {
                max_datagram: self.max_datagram_size,
                reserve: self.fragment_header_reserve,
            });
        }
        if !(self.latency_alpha > 0.0 && self.latency_alpha <= 1.0) {
            return Err(ConfigError::LatencyAlpha(self.latency_alpha));
        }
        if self.max_fragments_per_message == 0 || self.max_pending_reassemblies == 0 {
            return Err(ConfigError::ZeroReassemblyLimit);
        }
        if self.ping_interval.is_zero() || self.missing_object_retry_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.handshake_timeout < self.ping_interval {
            return Err(ConfigError::HandshakeTooShort);
        }
        if self.disconnect_timeout <= self.ping_interval {
            return Err(ConfigError::DisconnectTooShort);
        }
        Ok(())
    }
}

/// Builder for [`NetConfig`].
#[derive(Debug, Clone, Default)]
pub struct NetConfigBuilder {
    config: NetConfig,
}

impl NetConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: NetConfig::default(),
        }
    }

    /// Set the maximum datagram size.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.config.max_datagram_size = size;
        self
    }

    /// Set the fragment header reserve.
    pub fn fragment_header_reserve(mut self, bytes: usize) -> Self {
        self.config.fragment_header_reserve = bytes;
        self
    }

    /// Set the reassembly timeout.
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.config.reassembly_timeout = timeout;
        self
    }

    /// Set the number of concurrently open reassembly buffers.
    pub fn max_pending_reassemblies(mut self, max: usize) -> Self {
        self.config.max_pending_reassemblies = max;
        self
    }

    /// Set the heartbeat interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the post-connection disconnect timeout.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_timeout = timeout;
        self
    }

    /// Set the latency smoothing factor.
    pub fn latency_alpha(mut self, alpha: f64) -> Self {
        self.config.latency_alpha = alpha;
        self
    }

    /// Set the missing-object retry interval.
    pub fn missing_object_retry_interval(mut self, interval: Duration) -> Self {
        self.config.missing_object_retry_interval = interval;
        self
    }

    /// Cap missing-object requests per id. `None` never gives up.
    pub fn missing_object_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.missing_object_max_attempts = attempts;
        self
    }

    /// Set the scene sync retry interval.
    pub fn scene_sync_retry_interval(mut self, interval: Duration) -> Self {
        self.config.scene_sync_retry_interval = interval;
        self
    }

    /// Set the receive loop poll interval.
    pub fn recv_poll_interval(mut self, interval: Duration) -> Self {
        self.config.recv_poll_interval = interval;
        self
    }

    /// Set the peer directory poll interval.
    pub fn peer_poll_interval(mut self, interval: Duration) -> Self {
        self.config.peer_poll_interval = interval;
        self
    }

    /// Set the default component sync interval.
    pub fn default_sync_interval(mut self, interval: Duration) -> Self {
        self.config.default_sync_interval = interval;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<NetConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NetError;

    #[test]
    fn test_default_config_valid() {
        let config = NetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handshake_timeout, config.ping_interval * 20);
    }

    #[test]
    fn test_builder_overrides() {
        let config = NetConfig::builder()
            .max_datagram_size(2048)
            .ping_interval(Duration::from_millis(250))
            .missing_object_max_attempts(None)
            .build()
            .unwrap();

        assert_eq!(config.max_datagram_size, 2048);
        assert_eq!(config.ping_interval, Duration::from_millis(250));
        assert_eq!(config.missing_object_max_attempts, None);
    }

    #[test]
    fn test_builder_rejects_tiny_datagram() {
        let result = NetConfig::builder().max_datagram_size(100).build();
        assert_eq!(
            result.unwrap_err(),
            ConfigError::DatagramTooSmall {
                max_datagram: 100,
                reserve: 200,
            }
        );
    }

    #[test]
    fn test_builder_rejects_bad_alpha() {
        let result = NetConfig::builder().latency_alpha(0.0).build();
        assert_eq!(result.unwrap_err(), ConfigError::LatencyAlpha(0.0));
        let result = NetConfig::builder().latency_alpha(1.5).build();
        assert_eq!(result.unwrap_err(), ConfigError::LatencyAlpha(1.5));
    }

    #[test]
    fn test_builder_rejects_short_timeouts() {
        let result = NetConfig::builder()
            .ping_interval(Duration::from_secs(2))
            .handshake_timeout(Duration::from_secs(1))
            .build();
        assert_eq!(result.unwrap_err(), ConfigError::HandshakeTooShort);

        let result = NetConfig::builder()
            .disconnect_timeout(Duration::from_secs(1))
            .build();
        assert_eq!(result.unwrap_err(), ConfigError::DisconnectTooShort);
    }

    #[test]
    fn test_config_error_converts() {
        let err: NetError = ConfigError::ZeroInterval.into();
        assert!(matches!(err, NetError::Config(ConfigError::ZeroInterval)));
    }
}
