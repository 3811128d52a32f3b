//! Reverse proxy.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → table.rs (most specific enabled route, or fall through)
//!     → load_balancer::pool (canary/primary, strategy, health)
//!     → forward.rs (rewrite, send with timeout, relay response)
//!     → Response back into the pipeline (gzip, access log)
//! ```

pub mod forward;
pub mod table;

pub use forward::{build_client, forward, ProxyError, UpstreamClient};
pub use table::{ProxyRoute, ProxyTable};
