//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy route matched → pool.rs (UpstreamPool of the route)
//!     → canary.rs (session bucketed into canary or primary list)
//!     → filter healthy upstreams
//!     → Apply load balancing strategy:
//!         - round_robin.rs (rotate, or first healthy)
//!         - random.rs (uniform)
//!         - weighted.rs (smooth weighted round robin, weighted random)
//!         - ip_hash.rs (client affinity)
//!     → Return upstream or None (no healthy upstream)
//! ```
//!
//! # Design Decisions
//! - Strategies only see the healthy slice; health lives on the upstream
//! - A route whose canary list has no healthy member falls back to primary
//! - Strategy state (counters, scores) lives in the pool and is rebuilt
//!   only when the route changes

pub mod canary;
pub mod ip_hash;
pub mod pool;
pub mod random;
pub mod round_robin;
pub mod upstream;
pub mod weighted;

use std::sync::Arc;

use crate::config::schema::Strategy;

pub use pool::{Selection, UpstreamPool};
pub use upstream::Upstream;

/// Trait for load balancing algorithms.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Select an upstream from the list of healthy upstreams.
    fn next_server(&self, healthy: &[Arc<Upstream>], client_ip: &str) -> Option<Arc<Upstream>>;

    /// Forget per-upstream state, e.g. after the upstream recovers.
    fn reset(&self, _upstream: &Upstream) {}
}

/// Build the strategy for a route.
pub fn strategy(kind: Strategy) -> Arc<dyn LoadBalancer> {
    match kind {
        Strategy::None => Arc::new(round_robin::FirstHealthy),
        Strategy::RoundRobin => Arc::new(round_robin::RoundRobin::new()),
        Strategy::Random => Arc::new(random::Random),
        Strategy::IpHash => Arc::new(ip_hash::IpHash),
        Strategy::WeightRoundRobin => Arc::new(weighted::WeightedRoundRobin::new()),
        Strategy::WeightRandom => Arc::new(weighted::WeightedRandom),
    }
}
