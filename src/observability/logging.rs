//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick the log level from config, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Human-readable fmt layer; fields carry request ids and route names

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `level` is either a bare level (`info`) applied to this crate, or a full
/// filter directive string.
pub fn init_logging(level: &str) {
    let default_directive = if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("tidegate={},hyper=warn,reqwest=warn", level)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A second init (e.g. from tests) is not an error worth failing on.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
