//! Tidegate: an HTTP/1.1 server with static files, reverse proxying and
//! hot-reloadable configuration.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Traffic management
pub mod cache;
pub mod compression;
pub mod health;
pub mod load_balancer;
pub mod proxy;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{ServerContext, Shutdown};
