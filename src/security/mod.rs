//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (client IP, hop-by-hop filtering, X-Forwarded-For)
//!     → rate_limit.rs (first matching rule, token bucket per scope)
//!     → Pass to proxy or local routes
//! ```
//!
//! # Design Decisions
//! - The client IP is taken from `X-Forwarded-For` when present, so the
//!   server is expected to sit behind a trusted edge
//! - Rate limiting fails open: an unmatched request is always admitted

pub mod headers;
pub mod rate_limit;
