//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through the healthy upstreams.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, healthy: &[Arc<Upstream>], _client_ip: &str) -> Option<Arc<Upstream>> {
        if healthy.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(Arc::clone(&healthy[index]))
    }
}

/// Always the first healthy upstream.
#[derive(Debug, Default)]
pub struct FirstHealthy;

impl LoadBalancer for FirstHealthy {
    fn next_server(&self, healthy: &[Arc<Upstream>], _client_ip: &str) -> Option<Arc<Upstream>> {
        healthy.first().cloned()
    }
}
