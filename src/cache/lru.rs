//! Bounded LRU backend.
//!
//! # Responsibilities
//! - Keep the most recently used files, bounded by entry count, plus total
//!   content bytes under the `MEMORY` policy
//! - Expire entries older than the configured TTL
//! - Run a cleaner task that purges expired entries and, optionally, an
//!   adjuster task that resizes the bound from usage and hit rate
//!
//! # Design Decisions
//! - One mutex around the LRU list; it is held only for list mutation,
//!   never across a disk read
//! - Bounds are enforced by popping from the cold end after each insert,
//!   so resizing needs no rebuild
//! - Background tasks hold a `Weak` reference and are aborted on drop

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use lru::LruCache;
use tokio::task::JoinHandle;

use crate::cache::{modified_time, CacheError, CacheStats, CachedFile, StaticFileCache};
use crate::config::schema::{EvictionPolicy, LruCacheSettings};
use crate::observability::metrics;

const MIB: usize = 1024 * 1024;

/// Smallest memory budget the adjuster shrinks to.
const MIN_MEMORY_BUDGET: usize = 16 * MIB;

/// Smallest entry bound the adjuster shrinks to.
const MIN_ENTRY_BUDGET: usize = 10;

struct LruState {
    entries: LruCache<PathBuf, Arc<CachedFile>>,
    memory: usize,
}

/// LRU cache of static files.
pub struct LruFileCache {
    state: Mutex<LruState>,
    policy: EvictionPolicy,
    ttl: Duration,
    max_entries: AtomicUsize,
    max_memory: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LruFileCache {
    pub fn new(settings: &LruCacheSettings) -> Self {
        let settings = settings.clone().normalized();
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                memory: 0,
            }),
            policy: settings.policy,
            ttl: Duration::from_millis(settings.ttl_ms),
            max_entries: AtomicUsize::new(settings.max_entries.max(1)),
            max_memory: AtomicUsize::new((settings.max_memory_mb as usize).saturating_mul(MIB)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the cache and start its background tasks on the current
    /// runtime, if there is one.
    pub fn start(settings: &LruCacheSettings, cleaner_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(Self::new(settings));

        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!("No runtime available, LRU maintenance tasks not started");
            return cache;
        }

        let mut tasks = Vec::new();
        if !cleaner_interval.is_zero() {
            tasks.push(spawn_periodic(Arc::downgrade(&cache), cleaner_interval, |cache| {
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "LRU cleaner removed expired entries");
                }
            }));
        }
        if settings.dynamic_adjustment {
            let interval = Duration::from_millis(settings.adjust_interval_ms.max(1));
            tasks.push(spawn_periodic(Arc::downgrade(&cache), interval, |cache| cache.adjust()));
            tracing::info!(interval_ms = settings.adjust_interval_ms, "LRU cache adjuster started");
        }
        *cache.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks;

        cache
    }

    fn lock(&self) -> MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop cold entries until both bounds hold.
    fn enforce_bounds(&self, state: &mut LruState) {
        loop {
            let over_count = state.entries.len() > self.max_entries.load(Ordering::Relaxed);
            let over = match self.policy {
                EvictionPolicy::Size => over_count,
                EvictionPolicy::Memory => {
                    over_count || state.memory > self.max_memory.load(Ordering::Relaxed)
                }
            };
            if !over {
                break;
            }
            match state.entries.pop_lru() {
                Some((path, evicted)) => {
                    state.memory = state.memory.saturating_sub(evicted.len());
                    tracing::trace!(path = ?path, "LRU evicted");
                }
                None => break,
            }
        }
    }

    /// Remove entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock();
        let expired: Vec<PathBuf> = state
            .entries
            .iter()
            .filter(|(_, file)| file.cache_time().elapsed() > self.ttl)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &expired {
            if let Some(file) = state.entries.pop(path) {
                state.memory = state.memory.saturating_sub(file.len());
            }
        }
        expired.len()
    }

    /// Resize the active bound from current usage and hit rate.
    pub fn adjust(&self) {
        let stats = self.stats();
        let hit_rate = stats.hit_rate();

        let (budget, used, floor) = match self.policy {
            EvictionPolicy::Memory => (&self.max_memory, stats.memory_bytes as usize, MIN_MEMORY_BUDGET),
            EvictionPolicy::Size => (&self.max_entries, stats.entries as usize, MIN_ENTRY_BUDGET),
        };

        let current = budget.load(Ordering::Relaxed);
        if let Some(next) = adjusted_budget(current, used, hit_rate, floor) {
            budget.store(next, Ordering::Relaxed);
            if next < current {
                tracing::warn!(from = current, to = next, policy = ?self.policy, "Cache usage high, shrinking cache");
                let mut state = self.lock();
                self.enforce_bounds(&mut state);
            } else {
                tracing::info!(from = current, to = next, hit_rate, policy = ?self.policy, "Cache usage low with good hit rate, growing cache");
            }
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::Relaxed)
    }

    pub fn max_memory(&self) -> usize {
        self.max_memory.load(Ordering::Relaxed)
    }
}

/// New budget, or `None` to keep the current one.
///
/// Above 80% usage the budget shrinks by a fifth (not below `floor`); under
/// 50% usage with a hit rate above 70% it grows by a fifth.
fn adjusted_budget(current: usize, used: usize, hit_rate: f64, floor: usize) -> Option<usize> {
    if current == 0 {
        return None;
    }
    let usage = used as f64 / current as f64;

    if usage > 0.8 {
        let next = ((current as f64 * 0.8) as usize).max(floor);
        (next < current).then_some(next)
    } else if usage < 0.5 && hit_rate > 0.7 {
        Some(((current as f64 * 1.2) as usize).max(current + 1))
    } else {
        None
    }
}

fn spawn_periodic<F>(cache: Weak<LruFileCache>, every: Duration, task: F) -> JoinHandle<()>
where
    F: Fn(&LruFileCache) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.upgrade() {
                Some(cache) => task(&cache),
                None => break,
            }
        }
    })
}

impl Drop for LruFileCache {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}

impl StaticFileCache for LruFileCache {
    fn get(&self, path: &Path) -> Result<Arc<CachedFile>, CacheError> {
        let on_disk = modified_time(path)?;

        {
            let mut state = self.lock();
            let fresh = match state.entries.get(path) {
                Some(file) if file.last_modified() == on_disk && file.cache_time().elapsed() <= self.ttl => {
                    Some(Arc::clone(file))
                }
                Some(_) => {
                    if let Some(stale) = state.entries.pop(path) {
                        state.memory = state.memory.saturating_sub(stale.len());
                    }
                    None
                }
                None => None,
            };
            if let Some(file) = fresh {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                return Ok(file);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);

        let file = Arc::new(CachedFile::load(path)?);
        self.put(path, Arc::clone(&file));
        Ok(file)
    }

    fn put(&self, path: &Path, file: Arc<CachedFile>) {
        if self.policy == EvictionPolicy::Memory && file.len() > self.max_memory.load(Ordering::Relaxed) {
            tracing::debug!(path = ?path, size = file.len(), "File larger than cache budget, not cached");
            return;
        }

        let mut state = self.lock();
        let size = file.len();
        if let Some(old) = state.entries.put(path.to_path_buf(), file) {
            state.memory = state.memory.saturating_sub(old.len());
        }
        state.memory += size;
        self.enforce_bounds(&mut state);
    }

    fn remove(&self, path: &Path) {
        let mut state = self.lock();
        if let Some(file) = state.entries.pop(path) {
            state.memory = state.memory.saturating_sub(file.len());
        }
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.memory = 0;
    }

    fn contains(&self, path: &Path) -> bool {
        self.lock().entries.contains(path)
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: state.entries.len() as u64,
            memory_bytes: state.memory as u64,
        }
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}
