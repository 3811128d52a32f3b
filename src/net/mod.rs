//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limit)
//!     → listener.rs WorkerPool (bounded or unbounded dispatch)
//!     → connection.rs (registry entry, state machine, keep-alive budget)
//!     → Hand off to the HTTP layer
//!
//! Connection States:
//!     Accepted → Reading → Processing → Writing → IdleWait → ... → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection is registered so the idle sweep and shutdown can reach it
//! - Idle timeout is enforced by the sweep, not by the read call

pub mod connection;
pub mod listener;

pub use connection::{CloseReason, ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionState};
pub use listener::{Listener, ListenerError, WorkerPool};
