//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (RouteTable lookup in registration order)
//!     → matcher.rs (PathPattern against normalized path)
//!     → Return: Found(handler), MethodNotAllowed(allowed) or NotFound
//!
//! Route registration (at startup):
//!     (method, pattern, closure) triples
//!     → Compile patterns
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes registered at startup, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins

pub mod matcher;
pub mod router;

pub use matcher::PathPattern;
pub use router::{Handler, HandlerError, HandlerResult, RouteMatch, RouteTable};
