//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream target of a proxy route
//! - Track health (healthy until proven otherwise)
//! - Track passive recovery state so only one re-probe runs at a time

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use url::Url;

use crate::config::schema::UpstreamConfig;
use crate::observability::metrics;

/// A single upstream server.
#[derive(Debug)]
pub struct Upstream {
    /// Base URL requests are forwarded to.
    pub url: Url,
    /// Relative weight for weighted strategies (>= 1).
    pub weight: u32,
    healthy: AtomicBool,
    recovering: AtomicBool,
    recovery_attempts: AtomicU32,
}

impl Upstream {
    pub fn new(url: Url, weight: u32) -> Self {
        Self {
            url,
            weight: weight.max(1),
            healthy: AtomicBool::new(true),
            recovering: AtomicBool::new(false),
            recovery_attempts: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(&config.url)?, config.weight))
    }

    /// Base URL without a trailing slash, for logs and metric labels.
    pub fn base(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Absolute URL for `path_and_query` on this upstream.
    pub fn target_url(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base(), path_and_query)
        } else {
            format!("{}/{}", self.base(), path_and_query)
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Mark healthy. Returns true if this was a transition.
    pub fn mark_healthy(&self) -> bool {
        self.recovery_attempts.store(0, Ordering::Relaxed);
        let was = self.healthy.swap(true, Ordering::AcqRel);
        if !was {
            tracing::info!(upstream = %self.base(), "Upstream recovered");
            metrics::record_backend_health(self.base(), true);
        }
        !was
    }

    /// Mark unhealthy. Returns true if this was a transition.
    pub fn mark_unhealthy(&self) -> bool {
        let was = self.healthy.swap(false, Ordering::AcqRel);
        if was {
            tracing::warn!(upstream = %self.base(), "Upstream marked unhealthy");
            metrics::record_backend_health(self.base(), false);
        }
        was
    }

    /// Claim the recovery slot. Returns false if a recovery is already running.
    pub(crate) fn begin_recovery(&self) -> bool {
        self.recovering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_recovery(&self) {
        self.recovering.store(false, Ordering::Release);
    }

    /// Count a failed re-probe and return the total so far.
    pub(crate) fn record_recovery_attempt(&self) -> u32 {
        self.recovery_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }
}
