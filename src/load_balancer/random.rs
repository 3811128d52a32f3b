//! Uniform random selection.

use std::sync::Arc;

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

#[derive(Debug, Default)]
pub struct Random;

impl LoadBalancer for Random {
    fn next_server(&self, healthy: &[Arc<Upstream>], _client_ip: &str) -> Option<Arc<Upstream>> {
        if healthy.is_empty() {
            return None;
        }
        Some(Arc::clone(&healthy[fastrand::usize(..healthy.len())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::tests::upstreams;

    #[test]
    fn picks_every_upstream_eventually() {
        let backends = upstreams(&[1, 1, 1]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(Random.next_server(&backends, "").unwrap().url.port());
        }
        assert_eq!(seen.len(), 3);
    }
}
