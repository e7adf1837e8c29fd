//! Routing tunables

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide routing and delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Hop budget of a locally originated UDP flood broadcast
    pub max_hops_direct: u8,
    /// Hop budget of a locally originated cloud broadcast
    pub max_hops_cloud: u8,
    /// Maximum relayed HTTP messages per foreign ring during a cloud broadcast
    pub max_messages_per_ring: usize,
    /// How long the router remembers a forwarded message uuid
    pub seen_ttl: Duration,
    /// Maximum accepted message age
    pub message_lifetime: Duration,
    /// Number of sender workers
    pub sender_workers: usize,
    /// How often background sweepers evict expired cache entries
    pub cache_sweep_interval: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_hops_direct: 10,
            max_hops_cloud: 3,
            max_messages_per_ring: 2,
            seen_ttl: Duration::from_secs(30),
            message_lifetime: Duration::from_secs(60),
            sender_workers: 3,
            cache_sweep_interval: Duration::from_secs(10),
        }
    }
}

impl RoutingConfig {
    pub fn with_max_hops_direct(mut self, hops: u8) -> Self {
        self.max_hops_direct = hops;
        self
    }

    pub fn with_max_hops_cloud(mut self, hops: u8) -> Self {
        self.max_hops_cloud = hops;
        self
    }

    pub fn with_max_messages_per_ring(mut self, count: usize) -> Self {
        self.max_messages_per_ring = count;
        self
    }

    pub fn with_seen_ttl(mut self, ttl: Duration) -> Self {
        self.seen_ttl = ttl;
        self
    }

    pub fn with_message_lifetime(mut self, lifetime: Duration) -> Self {
        self.message_lifetime = lifetime;
        self
    }

    /// Set the sender pool size (at least one worker)
    pub fn with_sender_workers(mut self, workers: usize) -> Self {
        self.sender_workers = workers.max(1);
        self
    }

    pub fn with_cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache_sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RoutingConfig::default();
        assert_eq!(config.max_hops_direct, 10);
        assert_eq!(config.max_hops_cloud, 3);
        assert_eq!(config.max_messages_per_ring, 2);
        assert_eq!(config.seen_ttl, Duration::from_secs(30));
        assert_eq!(config.message_lifetime, Duration::from_secs(60));
        assert_eq!(config.sender_workers, 3);
    }

    #[test]
    fn test_builders() {
        let config = RoutingConfig::default()
            .with_max_hops_direct(4)
            .with_sender_workers(0);
        assert_eq!(config.max_hops_direct, 4);
        assert_eq!(config.sender_workers, 1);
    }

    #[test]
    fn test_postcard_roundtrip() {
        let config = RoutingConfig::default().with_max_messages_per_ring(5);
        let bytes = postcard::to_allocvec(&config).unwrap();
        let decoded: RoutingConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, config);
    }
}
