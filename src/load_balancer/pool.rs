//! Upstream pool of one proxy route.
//!
//! # Responsibilities
//! - Hold the route's primary and canary upstreams
//! - Route a request to the canary or primary list and apply the strategy
//! - Own the route's health check tasks
//!
//! # Design Decisions
//! - A pool is immutable once built; a changed route gets a new pool and
//!   the old one's tasks are aborted on drop
//! - Tasks are spawned through a runtime handle because pools may be
//!   rebuilt from a config watcher thread

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::schema::{HealthCheckMode, LoadBalanceConfig, LoadBalancerConfig};
use crate::health::{self, passive::RecoveryPolicy, HealthProber};
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::{canary, strategy, LoadBalancer, Upstream};

/// Upstream picked for one request.
#[derive(Debug, Clone)]
pub struct Selection {
    pub upstream: Arc<Upstream>,
    pub canary: bool,
}

/// Runtime pieces a pool needs for health checking.
#[derive(Clone)]
pub struct HealthContext {
    pub runtime: Handle,
    pub prober: HealthProber,
    pub settings: LoadBalanceConfig,
    pub shutdown: Shutdown,
}

pub struct UpstreamPool {
    route_id: String,
    config: LoadBalancerConfig,
    primary: Vec<Arc<Upstream>>,
    canary: Vec<Arc<Upstream>>,
    balancer: Arc<dyn LoadBalancer>,
    canary_balancer: Arc<dyn LoadBalancer>,
    health: Option<HealthContext>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UpstreamPool {
    /// Build a pool. Upstreams with unparsable URLs are skipped with a warning
    /// (validation normally rejects them earlier).
    pub fn new(route_id: &str, config: &LoadBalancerConfig, health: Option<HealthContext>) -> Self {
        let parse = |list: &[crate::config::schema::UpstreamConfig]| -> Vec<Arc<Upstream>> {
            list.iter()
                .filter_map(|u| match Upstream::from_config(u) {
                    Ok(upstream) => Some(Arc::new(upstream)),
                    Err(e) => {
                        tracing::warn!(route = %route_id, url = %u.url, error = %e, "Skipping invalid upstream URL");
                        None
                    }
                })
                .collect()
        };

        let pool = Self {
            route_id: route_id.to_string(),
            config: config.clone(),
            primary: parse(&config.upstreams),
            canary: parse(&config.canary_upstreams),
            balancer: strategy(config.strategy),
            canary_balancer: strategy(config.strategy),
            health,
            tasks: Mutex::new(Vec::new()),
        };
        pool.start_active_checks();
        pool
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    pub fn primary(&self) -> &[Arc<Upstream>] {
        &self.primary
    }

    pub fn canary(&self) -> &[Arc<Upstream>] {
        &self.canary
    }

    /// Pick an upstream for a request. `None` means no healthy upstream.
    pub fn select(&self, client_ip: &str, session_id: Option<&str>) -> Option<Selection> {
        if !self.canary.is_empty() && canary::is_canary(session_id, self.config.canary_percent) {
            let healthy = healthy(&self.canary);
            if let Some(upstream) = self.canary_balancer.next_server(&healthy, client_ip) {
                tracing::debug!(route = %self.route_id, upstream = %upstream.base(), "Canary upstream selected");
                return Some(Selection { upstream, canary: true });
            }
            tracing::debug!(route = %self.route_id, "No healthy canary upstream, using primary");
        }

        let healthy = healthy(&self.primary);
        let upstream = self.balancer.next_server(&healthy, client_ip)?;
        Some(Selection { upstream, canary: false })
    }

    /// Report that forwarding to `selection` failed. Only acts in passive mode.
    pub fn report_failure(&self, selection: &Selection) {
        if self.config.health_check_mode != HealthCheckMode::Passive {
            return;
        }
        let Some(ctx) = &self.health else {
            return;
        };

        let balancer = if selection.canary {
            self.canary_balancer.clone()
        } else {
            self.balancer.clone()
        };
        let policy = RecoveryPolicy {
            interval: Duration::from_millis(ctx.settings.recovery_interval_ms),
            failure_threshold: ctx.settings.failure_threshold.max(1),
        };

        if let Some(task) = health::passive::report_failure(
            &ctx.runtime,
            selection.upstream.clone(),
            ctx.prober.clone(),
            balancer,
            policy,
            ctx.shutdown.subscribe(),
        ) {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    fn start_active_checks(&self) {
        if self.config.health_check_mode != HealthCheckMode::Active {
            return;
        }
        let Some(ctx) = &self.health else {
            tracing::warn!(route = %self.route_id, "Active health checks requested without a runtime");
            return;
        };

        let interval = Duration::from_millis(self.config.check_interval_ms.max(100));
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (list, balancer) in [(&self.primary, &self.balancer), (&self.canary, &self.canary_balancer)] {
            if list.is_empty() {
                continue;
            }
            tasks.push(ctx.runtime.spawn(health::active::run(
                list.clone(),
                ctx.prober.clone(),
                balancer.clone(),
                interval,
                ctx.shutdown.subscribe(),
            )));
        }
    }
}

impl Drop for UpstreamPool {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn healthy(list: &[Arc<Upstream>]) -> Vec<Arc<Upstream>> {
    list.iter().filter(|u| u.is_healthy()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Strategy, UpstreamConfig};
    use crate::proxy::forward::build_client;

    fn upstream_configs(ports: &[u16]) -> Vec<UpstreamConfig> {
        ports
            .iter()
            .map(|p| UpstreamConfig { url: format!("http://127.0.0.1:{}", p), weight: 1 })
            .collect()
    }

    fn config(primary: &[u16], canary: &[u16], percent: u8) -> LoadBalancerConfig {
        LoadBalancerConfig {
            strategy: Strategy::RoundRobin,
            upstreams: upstream_configs(primary),
            canary_upstreams: upstream_configs(canary),
            canary_percent: percent,
            ..Default::default()
        }
    }

    #[test]
    fn skips_unhealthy() {
        let pool = UpstreamPool::new("api", &config(&[9000, 9001], &[], 0), None);
        pool.primary()[0].mark_unhealthy();
        for _ in 0..4 {
            assert_eq!(pool.select("1.2.3.4", None).unwrap().upstream.url.port(), Some(9001));
        }
        pool.primary()[1].mark_unhealthy();
        assert!(pool.select("1.2.3.4", None).is_none());
    }

    #[test]
    fn canary_routing_by_session() {
        let pool = UpstreamPool::new("api", &config(&[9000], &[9100], 100), None);

        let with_session = pool.select("1.2.3.4", Some("abc")).unwrap();
        assert!(with_session.canary);
        assert_eq!(with_session.upstream.url.port(), Some(9100));

        let without = pool.select("1.2.3.4", None).unwrap();
        assert!(!without.canary);

        // Unhealthy canary falls back to primary.
        pool.canary()[0].mark_unhealthy();
        let fallback = pool.select("1.2.3.4", Some("abc")).unwrap();
        assert!(!fallback.canary);
        assert_eq!(fallback.upstream.url.port(), Some(9000));
    }

    #[test]
    fn zero_percent_never_canary() {
        let pool = UpstreamPool::new("api", &config(&[9000], &[9100], 0), None);
        for i in 0..20 {
            assert!(!pool.select("1.2.3.4", Some(&format!("s{}", i))).unwrap().canary);
        }
    }

    #[tokio::test]
    async fn passive_failure_takes_upstream_out() {
        let mut cfg = config(&[1, 9001], &[], 0);
        cfg.health_check_mode = HealthCheckMode::Passive;
        let ctx = HealthContext {
            runtime: Handle::current(),
            prober: HealthProber::new(build_client(), &LoadBalanceConfig::default()),
            settings: LoadBalanceConfig { recovery_interval_ms: 60_000, ..Default::default() },
            shutdown: Shutdown::new(),
        };
        let pool = UpstreamPool::new("api", &cfg, Some(ctx));

        let selection = Selection { upstream: pool.primary()[0].clone(), canary: false };
        pool.report_failure(&selection);
        assert!(!pool.primary()[0].is_healthy());
        assert_eq!(pool.select("1.2.3.4", None).unwrap().upstream.url.port(), Some(9001));
    }

    #[test]
    fn disabled_mode_ignores_failures() {
        let pool = UpstreamPool::new("api", &config(&[9000], &[], 0), None);
        let selection = pool.select("1.2.3.4", None).unwrap();
        pool.report_failure(&selection);
        assert!(pool.primary()[0].is_healthy());
    }
}
