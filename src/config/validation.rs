//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, percentages <= 100)
//! - Check proxy routes are well formed (unique ids, parseable upstream URLs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{
    ReverseProxyRoute, ServerConfig, UpstreamConfig, WorkerMode, RemoteProviderKind,
};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("workers.max_workers must be greater than zero in bounded mode")]
    ZeroWorkers,

    #[error("duplicate reverse proxy route id '{0}'")]
    DuplicateRouteId(String),

    #[error("reverse proxy route '{route}': {reason}")]
    Route { route: String, reason: String },

    #[error("rate limit rule for '{0}' lists no scopes")]
    EmptyScopes(String),

    #[error("rate limit scope params must be positive (capacity {capacity}, rate {rate})")]
    ScopeParams { capacity: f64, rate: f64 },

    #[error("remote provider '{0:?}' requires an endpoint")]
    MissingRemoteEndpoint(RemoteProviderKind),
}

/// Check a configuration, collecting every problem.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.workers.mode == WorkerMode::Bounded && config.workers.max_workers == 0 {
        errors.push(ValidationError::ZeroWorkers);
    }

    for rule in &config.rate_limit.rules {
        if rule.scopes.is_empty() {
            errors.push(ValidationError::EmptyScopes(rule.path.clone()));
        }
    }
    for params in [
        config.rate_limit.ip_global,
        config.rate_limit.ip_uri,
        config.rate_limit.global_uri,
    ] {
        if params.capacity <= 0.0 || params.rate < 0.0 {
            errors.push(ValidationError::ScopeParams {
                capacity: params.capacity,
                rate: params.rate,
            });
        }
    }

    errors.extend(validate_routes(&config.reverse_proxy));

    if config.remote.provider != RemoteProviderKind::None && config.remote.endpoint.is_empty() {
        errors.push(ValidationError::MissingRemoteEndpoint(config.remote.provider));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a list of proxy routes. Also used on documents pushed by a
/// remote provider before they replace the active table.
pub fn validate_routes(routes: &[ReverseProxyRoute]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for route in routes {
        if !seen.insert(route.id.as_str()) {
            errors.push(ValidationError::DuplicateRouteId(route.id.clone()));
        }
        let mut fail = |reason: String| {
            errors.push(ValidationError::Route {
                route: route.id.clone(),
                reason,
            })
        };

        if route.path.is_empty() {
            fail("path must not be empty".to_string());
        }
        if route.timeout_ms == 0 {
            fail("timeout_ms must be greater than zero".to_string());
        }
        let lb = &route.load_balancer;
        if lb.canary_percent > 100 {
            fail(format!("canary_percent {} exceeds 100", lb.canary_percent));
        }
        if route.enabled && lb.upstreams.is_empty() {
            fail("no upstreams configured".to_string());
        }
        for upstream in lb.upstreams.iter().chain(lb.canary_upstreams.iter()) {
            if let Err(reason) = check_upstream(upstream) {
                fail(reason);
            }
        }
    }

    errors
}

fn check_upstream(upstream: &UpstreamConfig) -> Result<(), String> {
    let url = Url::parse(&upstream.url)
        .map_err(|e| format!("upstream '{}' is not a valid URL: {}", upstream.url, e))?;
    if url.scheme() != "http" {
        return Err(format!("upstream '{}' must use http", upstream.url));
    }
    if upstream.weight == 0 {
        return Err(format!("upstream '{}' has zero weight", upstream.url));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LoadBalancerConfig, RateLimitRule};

    fn route(id: &str, url: &str) -> ReverseProxyRoute {
        ReverseProxyRoute {
            enabled: true,
            id: id.to_string(),
            path: "/api/**".to_string(),
            strip_prefix: false,
            timeout_ms: 1000,
            add_headers: Default::default(),
            load_balancer: LoadBalancerConfig {
                upstreams: vec![UpstreamConfig { url: url.to_string(), weight: 1 }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.reverse_proxy = vec![route("a", "http://127.0.0.1:1"), route("a", "ftp://x")];
        config.rate_limit.rules.push(RateLimitRule {
            enabled: true,
            method: "GET".into(),
            path: "/x".into(),
            scopes: vec![],
        });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::BindAddress("not-an-address".into())));
        assert!(errors.contains(&ValidationError::DuplicateRouteId("a".into())));
        assert!(errors.contains(&ValidationError::EmptyScopes("/x".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Route { .. })));
    }
}
