//! Node configuration: every tunable named in spec §6.3, with the same
//! `::new(...)` + builder-method idiom the teacher's `DiscoveryConfig` uses.

use std::time::Duration;

/// Construction options for [`crate::node::DhtNode`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bucket size / lookup result width (`K` in spec.md).
    pub k: usize,
    /// Iterative-lookup parallelism (`alpha`).
    pub alpha: usize,
    /// Retained for API compatibility with the original fixed-bucket-count
    /// design; the routing table now splits buckets dynamically (§4.2), so
    /// this no longer bounds anything directly.
    pub bucket_count: usize,
    pub max_store_size: usize,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub replicate_interval: Duration,
    pub republish_interval: Duration,
    /// `None` means unbounded, per spec §4.6 ("Hard cap `max_peers` (default
    /// unbounded)").
    pub max_peers: Option<usize>,
    pub dht_signal_threshold: u32,
    pub dht_route_refresh_interval: Duration,
    /// Rendezvous WebSocket URLs tried in order at startup.
    pub bootstrap_addresses: Vec<String>,
    /// R = 3 in aggressive relay mode, 2 otherwise (spec §4.5 step 5).
    pub aggressive_relay: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            k: crate::routing::K,
            alpha: crate::lookup::ALPHA,
            bucket_count: 160,
            max_store_size: crate::storage::MAX_STORE_SIZE,
            max_key_size: crate::storage::MAX_KEY_SIZE,
            max_value_size: crate::storage::MAX_VALUE_SIZE,
            replicate_interval: Duration::from_secs(60 * 60),
            republish_interval: Duration::from_secs(24 * 60 * 60),
            max_peers: None,
            dht_signal_threshold: crate::signaling::DHT_SIGNAL_THRESHOLD,
            dht_route_refresh_interval: crate::signaling::DHT_ROUTE_REFRESH_INTERVAL,
            bootstrap_addresses: Vec::new(),
            aggressive_relay: false,
        }
    }
}

impl NodeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    #[must_use]
    pub fn with_alpha(mut self, alpha: usize) -> Self {
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = Some(max_peers);
        self
    }

    #[must_use]
    pub fn with_max_store_size(mut self, max_store_size: usize) -> Self {
        self.max_store_size = max_store_size;
        self
    }

    #[must_use]
    pub fn with_max_key_size(mut self, max_key_size: usize) -> Self {
        self.max_key_size = max_key_size;
        self
    }

    #[must_use]
    pub fn with_max_value_size(mut self, max_value_size: usize) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    #[must_use]
    pub fn with_replicate_interval(mut self, interval: Duration) -> Self {
        self.replicate_interval = interval;
        self
    }

    #[must_use]
    pub fn with_republish_interval(mut self, interval: Duration) -> Self {
        self.republish_interval = interval;
        self
    }

    #[must_use]
    pub fn with_dht_signal_threshold(mut self, threshold: u32) -> Self {
        self.dht_signal_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_aggressive_relay(mut self, aggressive: bool) -> Self {
        self.aggressive_relay = aggressive;
        self
    }

    #[must_use]
    pub fn with_dht_route_refresh_interval(mut self, interval: Duration) -> Self {
        self.dht_route_refresh_interval = interval;
        self
    }

    /// Add a rendezvous bootstrap address, tried in order at startup.
    pub fn add_bootstrap_node(&mut self, url: impl Into<String>) {
        self.bootstrap_addresses.push(url.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = NodeConfig::new();
        assert_eq!(cfg.k, 20);
        assert_eq!(cfg.alpha, 3);
        assert_eq!(cfg.max_store_size, 1000);
        assert_eq!(cfg.max_key_size, 1024);
        assert_eq!(cfg.max_value_size, 64 * 1024);
        assert_eq!(cfg.max_peers, None);
        assert_eq!(cfg.dht_signal_threshold, 2);
    }

    #[test]
    fn builder_methods_chain() {
        let cfg = NodeConfig::new().with_k(10).with_alpha(5).with_max_peers(50);
        assert_eq!(cfg.k, 10);
        assert_eq!(cfg.alpha, 5);
        assert_eq!(cfg.max_peers, Some(50));
    }
}
