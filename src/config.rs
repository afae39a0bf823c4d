//! Connection manager configuration

use std::time::Duration;

/// Endpoint used when neither the caller nor the configuration names one
pub const DEFAULT_URL: &str = "http://localhost:3000";

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Endpoint used when `connect` is called without a URL
    pub default_url: String,
    /// Upper bound on the transport handshake
    pub connect_timeout: Duration,
    /// Outbound frames buffered per link before sends are dropped
    pub outbound_buffer: usize,
    /// Status changes retained for slow subscribers
    pub status_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_url: DEFAULT_URL.into(),
            connect_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
            status_buffer: 32,
        }
    }
}

impl ManagerConfig {
    /// Replace the default endpoint
    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = url.into();
        self
    }

    /// Replace the handshake timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.default_url, "http://localhost:3000");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builders() {
        let config = ManagerConfig::default()
            .with_default_url("https://api.example.com")
            .with_connect_timeout(Duration::from_millis(500));
        assert_eq!(config.default_url, "https://api.example.com");
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
    }
}
