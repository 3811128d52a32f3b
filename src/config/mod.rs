//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! startup file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (local snapshot of every document)
//!
//! Per hot-reloadable document:
//!     FallbackConfigSource
//!         primary:  MutableConfigSource (unavailable → live remote provider)
//!         fallback: BackupConfigSource (last remote copy, when sync_path is set)
//!                   → LocalConfigSource (from the startup file)
//!     → source::bind → Reloadable consumer → atomic swap of its state
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Remote documents are JSON and are validated before they replace the
//!   last good snapshot

pub mod backup;
pub mod loader;
pub mod remote;
pub mod schema;
pub mod source;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CacheConfig, GzipConfig, KeepAliveConfig, ListenerConfig, RateLimitRule, ReverseProxyRoute,
    ServerConfig,
};
pub use source::{ConfigSource, Reloadable};
