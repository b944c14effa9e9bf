//! Registry configuration

use std::time::Duration;

/// Stream registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each stream's broadcast channel
    pub broadcast_capacity: usize,

    /// How long an idle stream (no publisher, no subscribers) is kept
    pub idle_stream_timeout: Duration,

    /// Interval between cleanup passes
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
            idle_stream_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Set the broadcast channel capacity
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Set the idle stream timeout
    pub fn idle_stream_timeout(mut self, timeout: Duration) -> Self {
        self.idle_stream_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.broadcast_capacity, 1024);
        assert_eq!(config.idle_stream_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .broadcast_capacity(0)
            .idle_stream_timeout(Duration::from_millis(10))
            .cleanup_interval(Duration::from_millis(5));

        // Capacity is clamped, broadcast channels need at least one slot
        assert_eq!(config.broadcast_capacity, 1);
        assert_eq!(config.idle_stream_timeout, Duration::from_millis(10));
        assert_eq!(config.cleanup_interval, Duration::from_millis(5));
    }
}
