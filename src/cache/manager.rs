//! Owner of the active cache backend.
//!
//! The backend and the config it was built from are published together
//! behind one atomic pointer. A reload with a different effective config
//! builds a fresh backend and swaps it in; requests already holding the old
//! backend finish against it, and it is dropped (stopping its maintenance
//! tasks) once the last of them is done.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::cache::lru::LruFileCache;
use crate::cache::no_cache::NoCache;
use crate::cache::ttl::TtlFileCache;
use crate::cache::{CacheError, CachedFile, StaticFileCache};
use crate::config::schema::{CacheConfig, CacheKind};
use crate::config::source::Reloadable;
use crate::observability::metrics;

struct ActiveCache {
    config: CacheConfig,
    backend: Arc<dyn StaticFileCache>,
}

pub struct CacheManager {
    active: ArcSwap<ActiveCache>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let backend = build_backend(&config);
        tracing::info!(backend = backend.name(), "Static file cache initialized");
        Self {
            active: ArcSwap::from_pointee(ActiveCache { config, backend }),
        }
    }

    /// Manager with caching turned off until a config arrives.
    pub fn disabled() -> Self {
        Self::new(CacheConfig::disabled())
    }

    /// Backend to use for one request.
    pub fn current(&self) -> Arc<dyn StaticFileCache> {
        Arc::clone(&self.active.load().backend)
    }

    pub fn config(&self) -> CacheConfig {
        self.active.load().config.clone()
    }

    pub fn get(&self, path: &Path) -> Result<Arc<CachedFile>, CacheError> {
        self.current().get(path)
    }
}

impl Reloadable<CacheConfig> for CacheManager {
    fn reload(&self, config: Option<CacheConfig>) {
        let Some(config) = config else {
            tracing::warn!("No cache configuration available, keeping current backend");
            return;
        };

        let current = self.active.load();
        if current.config == config {
            return;
        }

        let backend = build_backend(&config);
        tracing::info!(
            from = current.backend.name(),
            to = backend.name(),
            "Static file cache rebuilt"
        );
        self.active.store(Arc::new(ActiveCache { config, backend }));
        metrics::record_config_reload("cache");
    }
}

/// Backend constructor selected by the configured kind.
fn build_backend(config: &CacheConfig) -> Arc<dyn StaticFileCache> {
    match config.effective_kind() {
        CacheKind::None => Arc::new(NoCache::new()),
        CacheKind::Lru => LruFileCache::start(
            &config.lru,
            Duration::from_millis(config.cleaner_interval_ms),
        ),
        CacheKind::Ttl => Arc::new(TtlFileCache::new(&config.ttl)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_follows_config() {
        let manager = CacheManager::disabled();
        assert_eq!(manager.current().name(), "none");

        manager.reload(Some(CacheConfig::default()));
        assert_eq!(manager.current().name(), "lru");

        let ttl = CacheConfig {
            kind: CacheKind::Ttl,
            ..Default::default()
        };
        manager.reload(Some(ttl));
        assert_eq!(manager.current().name(), "ttl");

        // Missing document keeps the last good backend.
        manager.reload(None);
        assert_eq!(manager.current().name(), "ttl");
    }

    #[test]
    fn unchanged_config_keeps_backend_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();

        let manager = CacheManager::new(CacheConfig::default());
        manager.get(&path).unwrap();

        manager.reload(Some(CacheConfig::default()));
        assert!(manager.current().contains(&path));
    }

    #[test]
    fn in_flight_handle_survives_swap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();

        let manager = CacheManager::new(CacheConfig::default());
        let held = manager.current();
        manager.reload(Some(CacheConfig::disabled()));

        assert_eq!(held.get(&path).unwrap().content().as_ref(), b"a");
        assert!(held.contains(&path));
        assert_eq!(manager.current().name(), "none");
    }
}
