//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits so the same shapes deserialize from the
//! startup TOML file and from JSON documents served by a remote provider.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Worker dispatch model.
    pub workers: WorkerConfig,

    /// HTTP keep-alive policy.
    pub keep_alive: KeepAliveConfig,

    /// Static file serving.
    pub static_files: StaticFilesConfig,

    /// Static file cache backend.
    pub cache: CacheConfig,

    /// Response compression.
    pub gzip: GzipConfig,

    /// Rate limiting rules and per-scope bucket parameters.
    pub rate_limit: RateLimitConfig,

    /// Reverse proxy routes.
    pub reverse_proxy: Vec<ReverseProxyRoute>,

    /// Upstream health recovery settings shared by all routes.
    pub load_balance: LoadBalanceConfig,

    /// Remote configuration provider.
    pub remote: RemoteConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Fixed number of workers with a bounded wait queue. Connections
    /// arriving when the queue is full are rejected.
    Bounded,
    /// One lightweight task per connection, no upper bound.
    Unbounded,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub mode: WorkerMode,

    /// Connections served concurrently in bounded mode.
    pub max_workers: usize,

    /// Connections allowed to wait for a worker in bounded mode.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            mode: WorkerMode::Unbounded,
            max_workers: (cores + 1).max(4),
            queue_capacity: 1000,
        }
    }
}

/// Keep-alive policy. Replaced as a whole on reload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub enabled: bool,

    /// Idle time after which the sweep closes a connection.
    pub timeout_secs: u64,

    /// Requests served on one connection before it is closed.
    pub max_requests: u64,

    /// Interval of the idle sweep.
    pub check_interval_secs: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 60,
            max_requests: 100,
            check_interval_secs: 30,
        }
    }
}

impl KeepAliveConfig {
    /// Replace zero values with the defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.timeout_secs == 0 {
            self.timeout_secs = defaults.timeout_secs;
        }
        if self.max_requests == 0 {
            self.max_requests = defaults.max_requests;
        }
        if self.check_interval_secs == 0 {
            self.check_interval_secs = defaults.check_interval_secs;
        }
        self
    }
}

/// Static file serving configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Directory files are served from.
    pub web_root: PathBuf,

    /// File served for "/" and for directory paths.
    pub index_file: String,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            web_root: PathBuf::from("./www"),
            index_file: "index.html".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Cache backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheKind {
    /// Bounded LRU with cleaner and optional adjuster tasks.
    Lru,
    /// Time and weight bounded cache.
    Ttl,
    /// Pass-through, every read hits the disk.
    None,
}

/// What bounds a cache: entry count or total content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionPolicy {
    Size,
    Memory,
}

/// When a TTL entry's clock starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpireType {
    /// Expire a fixed time after insertion.
    Write,
    /// Expire a fixed time after the last read.
    Access,
}

/// Static file cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    #[serde(rename = "type")]
    pub kind: CacheKind,

    /// Interval of the LRU cleaner task.
    pub cleaner_interval_ms: u64,

    pub lru: LruCacheSettings,

    pub ttl: TtlCacheSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: CacheKind::Lru,
            cleaner_interval_ms: 60_000,
            lru: LruCacheSettings::default(),
            ttl: TtlCacheSettings::default(),
        }
    }
}

impl CacheConfig {
    /// Configuration used when no source provides one.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            kind: CacheKind::None,
            ..Self::default()
        }
    }

    /// The backend that will actually be built.
    pub fn effective_kind(&self) -> CacheKind {
        if self.enabled {
            self.kind
        } else {
            CacheKind::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LruCacheSettings {
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub policy: EvictionPolicy,
    pub max_memory_mb: u64,
    pub dynamic_adjustment: bool,
    pub adjust_interval_ms: u64,
}

impl Default for LruCacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl_ms: 60_000,
            policy: EvictionPolicy::Size,
            max_memory_mb: 64,
            dynamic_adjustment: false,
            adjust_interval_ms: 60_000,
        }
    }
}

impl LruCacheSettings {
    /// Smallest TTL an LRU entry may have.
    pub const MIN_TTL_MS: u64 = 60_000;

    /// Clamp values below their floors.
    pub fn normalized(mut self) -> Self {
        self.max_entries = self.max_entries.max(1);
        self.ttl_ms = self.ttl_ms.max(Self::MIN_TTL_MS);
        self.max_memory_mb = self.max_memory_mb.max(1);
        if self.adjust_interval_ms == 0 {
            self.adjust_interval_ms = Self::default().adjust_interval_ms;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TtlCacheSettings {
    pub expire: ExpireType,
    pub ttl_ms: u64,
    pub policy: EvictionPolicy,
    pub max_memory_mb: u64,
    pub max_entries: u64,
}

impl Default for TtlCacheSettings {
    fn default() -> Self {
        Self {
            expire: ExpireType::Write,
            ttl_ms: 60_000,
            policy: EvictionPolicy::Size,
            max_memory_mb: 100,
            max_entries: 100,
        }
    }
}

/// Gzip compression configuration.
///
/// Lengths and levels are signed so out-of-range values written by an
/// operator can be detected and reset rather than rejected by the parser.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GzipConfig {
    pub enabled: bool,
    pub min_content_length: i64,
    pub level: i32,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_content_length: 1024,
            level: 6,
        }
    }
}

impl GzipConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Reset out-of-range values to their defaults.
    pub fn normalized(mut self) -> Self {
        if !(0..=9).contains(&self.level) {
            self.level = 6;
        }
        if self.min_content_length < 0 {
            self.min_content_length = 1024;
        }
        self
    }
}

/// Dimension a token bucket key is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitScope {
    /// Per client IP and path.
    IpUri,
    /// Per client IP across all paths.
    IpGlobal,
    /// Per path across all clients.
    GlobalUri,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::IpUri => "IP_URI",
            RateLimitScope::IpGlobal => "IP_GLOBAL",
            RateLimitScope::GlobalUri => "GLOBAL_URI",
        }
    }
}

/// One rate limiting rule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitRule {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP method, or "ALL".
    #[serde(default = "default_all_methods")]
    pub method: String,

    /// "*" for every path, a trailing "*" for a prefix, otherwise exact.
    pub path: String,

    pub scopes: Vec<RateLimitScope>,
}

fn default_true() -> bool {
    true
}

fn default_all_methods() -> String {
    "ALL".to_string()
}

/// Bucket parameters for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScopeParams {
    pub capacity: f64,
    /// Tokens added per second.
    pub rate: f64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Master switch. When false every request is admitted.
    pub enabled: bool,
    pub ip_global: ScopeParams,
    pub ip_uri: ScopeParams,
    pub global_uri: ScopeParams,
    /// Ordered rules, the first enabled match governs.
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ip_global: ScopeParams { capacity: 1000.0, rate: 1.667 },
            ip_uri: ScopeParams { capacity: 100.0, rate: 0.1667 },
            global_uri: ScopeParams { capacity: 5000.0, rate: 8.333 },
            rules: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn params(&self, scope: RateLimitScope) -> ScopeParams {
        match scope {
            RateLimitScope::IpUri => self.ip_uri,
            RateLimitScope::IpGlobal => self.ip_global,
            RateLimitScope::GlobalUri => self.global_uri,
        }
    }
}

/// Upstream selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// First healthy upstream.
    #[default]
    None,
    RoundRobin,
    Random,
    IpHash,
    WeightRoundRobin,
    WeightRandom,
}

/// How upstream health is tracked for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCheckMode {
    /// Periodic probes.
    Active,
    /// Marked down on forwarding failure, re-probed later.
    Passive,
    #[default]
    Disabled,
}

/// One upstream target.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL, e.g. "http://10.0.0.5:9000".
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Load balancing for one proxy route.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: Strategy,
    pub health_check_mode: HealthCheckMode,
    pub check_interval_ms: u64,
    pub upstreams: Vec<UpstreamConfig>,
    pub canary_upstreams: Vec<UpstreamConfig>,
    /// Share of sessions (0..=100) sent to the canary upstreams.
    pub canary_percent: u8,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::None,
            health_check_mode: HealthCheckMode::Disabled,
            check_interval_ms: 10_000,
            upstreams: Vec::new(),
            canary_upstreams: Vec::new(),
            canary_percent: 0,
        }
    }
}

/// Reverse proxy route.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReverseProxyRoute {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Route identifier for logging/metrics.
    pub id: String,

    /// Path pattern, supports `*` and `**`.
    pub path: String,

    #[serde(default)]
    pub strip_prefix: bool,

    /// Upstream call timeout in milliseconds.
    #[serde(default = "default_proxy_timeout_ms")]
    pub timeout_ms: u64,

    /// Headers injected into the forwarded request.
    #[serde(default)]
    pub add_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
}

fn default_proxy_timeout_ms() -> u64 {
    30_000
}

/// Upstream health recovery settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalanceConfig {
    /// Delay before a passively failed upstream is re-probed.
    pub recovery_interval_ms: u64,

    /// Re-probe attempts before giving up until the next failure.
    pub failure_threshold: u32,

    pub health_check_path: String,

    pub health_check_timeout_ms: u64,
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            recovery_interval_ms: 30_000,
            failure_threshold: 3,
            health_check_path: "/health".to_string(),
            health_check_timeout_ms: 2_000,
        }
    }
}

/// Which remote provider backs the hot-reloadable documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProviderKind {
    #[default]
    None,
    /// Poll a config service over HTTP.
    Http,
    /// Watch a directory of JSON documents.
    File,
}

/// Remote configuration provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub provider: RemoteProviderKind,

    /// Base URL (http) or directory (file).
    pub endpoint: String,

    pub poll_interval_ms: u64,

    pub timeout_ms: u64,

    /// Base delay for reconnect backoff.
    pub reconnect_base_ms: u64,

    /// Cap for reconnect backoff.
    pub reconnect_max_ms: u64,

    /// Directory holding a local copy of every remote document. The copy
    /// is served when the store has nothing. Unset disables backups.
    pub sync_path: Option<PathBuf>,

    /// Interval of the periodic backup re-sync. Zero syncs on change only.
    pub sync_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: RemoteProviderKind::None,
            endpoint: String::new(),
            poll_interval_ms: 5_000,
            timeout_ms: 3_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            sync_path: None,
            sync_interval_ms: 7_200_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_out_of_range_values_reset() {
        let config = GzipConfig { enabled: true, min_content_length: -5, level: 12 }.normalized();
        assert_eq!(config.level, 6);
        assert_eq!(config.min_content_length, 1024);

        let config = GzipConfig { enabled: true, min_content_length: 0, level: 0 }.normalized();
        assert_eq!(config.level, 0);
        assert_eq!(config.min_content_length, 0);
    }

    #[test]
    fn lru_settings_floors() {
        let settings = LruCacheSettings { max_entries: 0, ttl_ms: 10, ..Default::default() }.normalized();
        assert_eq!(settings.max_entries, 1);
        assert_eq!(settings.ttl_ms, LruCacheSettings::MIN_TTL_MS);
    }

    #[test]
    fn keep_alive_zero_values_fall_back() {
        let config = KeepAliveConfig { enabled: true, timeout_secs: 0, max_requests: 0, check_interval_secs: 0 }.normalized();
        assert_eq!(config, KeepAliveConfig::default());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [cache]
            type = "TTL"

            [[rate_limit.rules]]
            method = "GET"
            path = "/api/*"
            scopes = ["IP_GLOBAL", "GLOBAL_URI"]

            [[reverse_proxy]]
            id = "users"
            path = "/users/**"
            strip_prefix = true

            [reverse_proxy.load_balancer]
            strategy = "ROUND_ROBIN"
            upstreams = [{ url = "http://127.0.0.1:9001" }, { url = "http://127.0.0.1:9002", weight = 3 }]
        "#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.cache.kind, CacheKind::Ttl);
        assert_eq!(config.rate_limit.rules[0].scopes, vec![RateLimitScope::IpGlobal, RateLimitScope::GlobalUri]);
        assert!(config.rate_limit.rules[0].enabled);
        let route = &config.reverse_proxy[0];
        assert_eq!(route.timeout_ms, 30_000);
        assert_eq!(route.load_balancer.strategy, Strategy::RoundRobin);
        assert_eq!(route.load_balancer.upstreams[0].weight, 1);
        assert_eq!(route.load_balancer.upstreams[1].weight, 3);
    }
}
