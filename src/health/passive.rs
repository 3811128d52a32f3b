//! Passive health checking (failure-triggered recovery).
//!
//! # Responsibilities
//! - Take an upstream out of rotation when forwarding to it fails
//! - Re-probe it after the recovery interval
//! - Give up after `failure_threshold` failed re-probes
//!
//! # Design Decisions
//! - One recovery task per upstream at a time (guarded by a flag on the
//!   upstream); concurrent failure reports while it runs are ignored
//! - Recovery resets the strategy's per-upstream state so a weighted
//!   upstream does not come back with a stale score

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::health::HealthProber;
use crate::load_balancer::{LoadBalancer, Upstream};

#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub interval: Duration,
    pub failure_threshold: u32,
}

/// Mark `upstream` unhealthy and spawn its recovery loop on `runtime`.
///
/// Returns `None` when a recovery for this upstream is already running.
pub fn report_failure(
    runtime: &Handle,
    upstream: Arc<Upstream>,
    prober: HealthProber,
    balancer: Arc<dyn LoadBalancer>,
    policy: RecoveryPolicy,
    shutdown: broadcast::Receiver<()>,
) -> Option<JoinHandle<()>> {
    if !upstream.begin_recovery() {
        return None;
    }
    upstream.mark_unhealthy();
    tracing::error!(upstream = %upstream.base(), "Upstream marked unhealthy after request failure");

    Some(runtime.spawn(recover(upstream, prober, balancer, policy, shutdown)))
}

async fn recover(
    upstream: Arc<Upstream>,
    prober: HealthProber,
    balancer: Arc<dyn LoadBalancer>,
    policy: RecoveryPolicy,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = time::sleep(policy.interval) => {}
            _ = shutdown.recv() => break,
        }

        if prober.probe(&upstream).await {
            upstream.mark_healthy();
            balancer.reset(&upstream);
            tracing::info!(upstream = %upstream.base(), "Upstream automatically recovered");
            break;
        }

        let attempts = upstream.record_recovery_attempt();
        if attempts >= policy.failure_threshold {
            tracing::warn!(
                upstream = %upstream.base(),
                attempts,
                "Upstream reached max recovery attempts, will not retry further until next failure"
            );
            break;
        }
        tracing::warn!(upstream = %upstream.base(), attempts, "Upstream recovery failed, retrying");
    }
    upstream.end_recovery();
}
