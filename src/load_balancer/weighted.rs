//! Weight-aware strategies.
//!
//! - [`WeightedRoundRobin`]: smooth weighted round robin. Each pick adds
//!   every healthy upstream's weight to its running score, takes the highest
//!   score and subtracts the total weight from the winner. A 5/1/1 split
//!   yields `a a b a c a a` rather than five `a`s in a row.
//! - [`WeightedRandom`]: random pick proportional to weight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    /// Running score per upstream URL.
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, healthy: &[Arc<Upstream>], _client_ip: &str) -> Option<Arc<Upstream>> {
        if healthy.is_empty() {
            return None;
        }

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let total: i64 = healthy.iter().map(|u| i64::from(u.weight)).sum();

        let mut best: Option<(&Arc<Upstream>, i64)> = None;
        for upstream in healthy {
            let score = current.entry(upstream.url.to_string()).or_insert(0);
            *score += i64::from(upstream.weight);
            if best.map_or(true, |(_, s)| *score > s) {
                best = Some((upstream, *score));
            }
        }

        let (chosen, _) = best?;
        if let Some(score) = current.get_mut(chosen.url.as_str()) {
            *score -= total;
        }
        Some(Arc::clone(chosen))
    }

    fn reset(&self, upstream: &Upstream) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.insert(upstream.url.to_string(), 0);
    }
}

#[derive(Debug, Default)]
pub struct WeightedRandom;

impl LoadBalancer for WeightedRandom {
    fn next_server(&self, healthy: &[Arc<Upstream>], _client_ip: &str) -> Option<Arc<Upstream>> {
        if healthy.is_empty() {
            return None;
        }

        let prefix: Vec<u64> = healthy
            .iter()
            .scan(0u64, |acc, u| {
                *acc += u64::from(u.weight);
                Some(*acc)
            })
            .collect();
        let total = *prefix.last()?;

        let roll = rand::thread_rng().gen_range(0..total);
        let index = prefix.partition_point(|&bound| bound <= roll);
        healthy.get(index).cloned()
    }
}
