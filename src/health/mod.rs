//! Upstream health checking.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → GET {upstream}{health_check_path} on each upstream of the route
//!     → 2xx marks healthy, anything else (or timeout) marks unhealthy
//!
//! Passive health checks (passive.rs):
//!     Forwarding failure reported by the proxy
//!     → Upstream marked unhealthy
//!     → Re-probed every recovery interval until healthy or the
//!       failure threshold is reached
//! ```
//!
//! # Design Decisions
//! - Health state lives on the upstream, not in the pool, so both modes
//!   and all strategies share one view
//! - Probe tasks belong to the pool that spawned them and are aborted when
//!   the pool is replaced by a config reload

pub mod active;
pub mod passive;

pub use active::HealthProber;
