//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → ServerContext (subsystems + config bindings) → remote connect
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Broadcast → stop accepting → drain connections → background tasks exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then subsystems, listener last
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a deadline; connections still open after it are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{ServerContext, StartupError};
