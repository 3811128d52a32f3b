//! Client-IP affinity.
//!
//! The same client IP maps to the same upstream as long as the healthy set
//! does not change.

use std::sync::Arc;

use crate::load_balancer::canary::string_hash;
use crate::load_balancer::{upstream::Upstream, LoadBalancer};

#[derive(Debug, Default)]
pub struct IpHash;

impl LoadBalancer for IpHash {
    fn next_server(&self, healthy: &[Arc<Upstream>], client_ip: &str) -> Option<Arc<Upstream>> {
        if healthy.is_empty() {
            return None;
        }
        let index = string_hash(client_ip).unsigned_abs() as usize % healthy.len();
        tracing::trace!(client = %client_ip, index, "IP hash selection");
        Some(Arc::clone(&healthy[index]))
    }
}
