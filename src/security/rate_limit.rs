//! Token-bucket rate limiting.
//!
//! # Responsibilities
//! - Match a request against the ordered rule list (first enabled match governs)
//! - Derive one bucket key per scope of the matched rule
//! - Admit only if every scope's bucket yields a token
//!
//! # Design Decisions
//! - One mutex per bucket; the registry map is sharded (`DashMap`) and its
//!   shard lock is released before a bucket is locked
//! - Buckets are created lazily and start full
//! - Replacing the rules drops every bucket so new limits apply at once

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use hyper::Method;

use crate::config::schema::{RateLimitConfig, RateLimitRule, RateLimitScope, ScopeParams};
use crate::config::source::Reloadable;
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self::new_at(capacity, rate, Instant::now())
    }

    pub fn new_at(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Refill for the time elapsed up to `now`, then take one token if one
    /// is available.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }
}

type BucketKey = (RateLimitScope, String);

/// Lazily populated map of buckets.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: DashMap<BucketKey, Arc<Mutex<TokenBucket>>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a token from the bucket for `(scope, key)`, creating it full.
    pub fn try_acquire(&self, scope: RateLimitScope, key: String, params: ScopeParams) -> bool {
        let bucket = self
            .buckets
            .entry((scope, key))
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(params.capacity, params.rate))))
            .clone();

        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Rejected by the bucket of this scope.
    Rejected(RateLimitScope),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Rule-driven limiter shared by every connection.
pub struct RateLimiter {
    config: ArcSwap<RateLimitConfig>,
    registry: BucketRegistry,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        tracing::info!(
            enabled = config.enabled,
            rules = config.rules.len(),
            "Rate limiter initialized"
        );
        Self {
            config: ArcSwap::from_pointee(config),
            registry: BucketRegistry::new(),
        }
    }

    /// Check `method path` from `client_ip`.
    pub fn admit(&self, method: &Method, path: &str, client_ip: &str) -> Admission {
        let config = self.config.load();
        if !config.enabled {
            return Admission::Admitted;
        }

        let Some(rule) = config
            .rules
            .iter()
            .find(|r| r.enabled && rule_matches(r, method, path))
        else {
            return Admission::Admitted;
        };

        for &scope in &rule.scopes {
            let key = bucket_key(scope, method, path, client_ip);
            if !self.registry.try_acquire(scope, key, config.params(scope)) {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    client = %client_ip,
                    scope = scope.as_str(),
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(scope.as_str());
                return Admission::Rejected(scope);
            }
        }

        Admission::Admitted
    }

    pub fn bucket_count(&self) -> usize {
        self.registry.len()
    }
}

impl Reloadable<Vec<RateLimitRule>> for RateLimiter {
    fn reload(&self, rules: Option<Vec<RateLimitRule>>) {
        let Some(rules) = rules else {
            tracing::warn!("No rate limit rules available, keeping current rules");
            return;
        };

        let current = self.config.load();
        if current.rules == rules {
            return;
        }

        let mut next = RateLimitConfig::clone(&current);
        next.rules = rules;
        let count = next.rules.len();
        self.config.store(Arc::new(next));
        self.registry.clear();

        metrics::record_config_reload("rate-limit");
        tracing::info!(rules = count, "Rate limiting rules refreshed");
    }
}

fn rule_matches(rule: &RateLimitRule, method: &Method, path: &str) -> bool {
    let method_matches = rule.method.is_empty()
        || rule.method == "*"
        || rule.method.eq_ignore_ascii_case("ALL")
        || rule.method.eq_ignore_ascii_case(method.as_str());

    method_matches && path_matches(&rule.path, path)
}

fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

fn bucket_key(scope: RateLimitScope, method: &Method, path: &str, client_ip: &str) -> String {
    match scope {
        RateLimitScope::GlobalUri => format!("{}:{}", method, path),
        RateLimitScope::IpUri => format!("{}:{}:{}", client_ip, method, path),
        RateLimitScope::IpGlobal => format!("{}:GLOBAL", client_ip),
    }
}
