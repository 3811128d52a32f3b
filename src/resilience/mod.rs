//! Resilience helpers.
//!
//! Upstream calls are bounded by per-route timeouts in `proxy::forward` and
//! are never retried. Backoff is used where the server itself reconnects:
//! the remote config store.

pub mod backoff;
