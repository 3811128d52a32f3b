//! Proxy route table.
//!
//! # Responsibilities
//! - Resolve a request path to the most specific enabled proxy route
//! - Hold one upstream pool per route
//! - Swap the whole table atomically on config reload
//!
//! # Design Decisions
//! - Routes are ordered by pattern length, longest first; ties keep
//!   configuration order
//! - A route whose config is unchanged across a reload keeps its pool, so
//!   health state and balancer counters survive unrelated edits

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::ReverseProxyRoute;
use crate::config::source::Reloadable;
use crate::load_balancer::pool::{HealthContext, UpstreamPool};
use crate::observability::metrics;
use crate::routing::matcher::PathPattern;

/// One enabled route with its compiled pattern and upstream pool.
pub struct ProxyRoute {
    config: ReverseProxyRoute,
    pattern: PathPattern,
    pool: UpstreamPool,
}

impl ProxyRoute {
    pub fn new(config: ReverseProxyRoute, health: Option<HealthContext>) -> Self {
        let pattern = PathPattern::new(&config.path);
        let pool = UpstreamPool::new(&config.id, &config.load_balancer, health);
        Self { config, pattern, pool }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ReverseProxyRoute {
        &self.config
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }
}

pub struct ProxyTable {
    routes: ArcSwap<Vec<Arc<ProxyRoute>>>,
    health: Option<HealthContext>,
}

impl ProxyTable {
    /// Build a table. `health` is required for ACTIVE and PASSIVE routes;
    /// without it those routes behave as DISABLED.
    pub fn new(routes: Vec<ReverseProxyRoute>, health: Option<HealthContext>) -> Self {
        let table = Self {
            routes: ArcSwap::from_pointee(Vec::new()),
            health,
        };
        table.routes.store(Arc::new(table.build(routes)));
        table
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Most specific enabled route matching `path`.
    pub fn resolve(&self, path: &str) -> Option<Arc<ProxyRoute>> {
        let routes = self.routes.load();
        let route = routes.iter().find(|r| r.pattern.matches(path)).cloned();
        if let Some(r) = &route {
            tracing::debug!(path = %path, route = %r.id(), "Request matched proxy route");
        }
        route
    }

    pub fn routes(&self) -> Arc<Vec<Arc<ProxyRoute>>> {
        self.routes.load_full()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, configs: Vec<ReverseProxyRoute>) -> Vec<Arc<ProxyRoute>> {
        let current = self.routes.load();
        let existing: HashMap<&str, &Arc<ProxyRoute>> =
            current.iter().map(|r| (r.id(), r)).collect();

        let mut routes: Vec<Arc<ProxyRoute>> = configs
            .into_iter()
            .filter(|c| c.enabled)
            .map(|config| match existing.get(config.id.as_str()) {
                Some(route) if route.config == config => Arc::clone(route),
                _ => Arc::new(ProxyRoute::new(config, self.health.clone())),
            })
            .collect();
        routes.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));
        routes
    }
}

impl Reloadable<Vec<ReverseProxyRoute>> for ProxyTable {
    fn reload(&self, routes: Option<Vec<ReverseProxyRoute>>) {
        let Some(routes) = routes else {
            tracing::warn!("No reverse proxy configuration available, keeping current routes");
            return;
        };
        let routes = self.build(routes);
        tracing::info!(routes = routes.len(), "Reverse proxy routes refreshed");
        self.routes.store(Arc::new(routes));
        metrics::record_config_reload("reverse-proxy");
    }
}
