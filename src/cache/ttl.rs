//! Time-bounded backend with weight-based eviction.
//!
//! Entries expire a fixed time after insertion (`WRITE`) or after their
//! last read (`ACCESS`). The capacity is an entry count (`SIZE`) or a total
//! byte weight (`MEMORY`); moka does the bookkeeping and eviction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::cache::{modified_time, CacheError, CacheStats, CachedFile, StaticFileCache};
use crate::config::schema::{EvictionPolicy, ExpireType, TtlCacheSettings};
use crate::observability::metrics;

const MIB: u64 = 1024 * 1024;

pub struct TtlFileCache {
    inner: Cache<PathBuf, Arc<CachedFile>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlFileCache {
    pub fn new(settings: &TtlCacheSettings) -> Self {
        let ttl = Duration::from_millis(settings.ttl_ms.max(1));

        let mut builder = Cache::<PathBuf, Arc<CachedFile>>::builder();
        builder = match settings.policy {
            EvictionPolicy::Size => builder.max_capacity(settings.max_entries.max(1)),
            EvictionPolicy::Memory => builder
                .weigher(|_path: &PathBuf, file: &Arc<CachedFile>| -> u32 {
                    u32::try_from(file.len()).unwrap_or(u32::MAX)
                })
                .max_capacity(settings.max_memory_mb.max(1).saturating_mul(MIB)),
        };
        builder = match settings.expire {
            ExpireType::Write => builder.time_to_live(ttl),
            ExpireType::Access => builder.time_to_idle(ttl),
        };

        Self {
            inner: builder.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl StaticFileCache for TtlFileCache {
    fn get(&self, path: &Path) -> Result<Arc<CachedFile>, CacheError> {
        let on_disk = modified_time(path)?;

        if let Some(file) = self.inner.get(path) {
            if file.last_modified() == on_disk {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                return Ok(file);
            }
            self.inner.invalidate(path);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);

        let file = Arc::new(CachedFile::load(path)?);
        self.inner.insert(path.to_path_buf(), Arc::clone(&file));
        Ok(file)
    }

    fn put(&self, path: &Path, file: Arc<CachedFile>) {
        self.inner.insert(path.to_path_buf(), file);
    }

    fn remove(&self, path: &Path) {
        self.inner.invalidate(path);
    }

    fn clear(&self) {
        self.inner.invalidate_all();
    }

    fn contains(&self, path: &Path) -> bool {
        self.inner.contains_key(path)
    }

    fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        let memory_bytes = self
            .inner
            .iter()
            .map(|(_, file)| file.len() as u64)
            .sum();

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.entry_count(),
            memory_bytes,
        }
    }

    fn name(&self) -> &'static str {
        "ttl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::SystemTime;

    #[test]
    fn serves_hits_until_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        fs::write(&path, "v1").unwrap();

        let cache = TtlFileCache::new(&TtlCacheSettings::default());
        cache.get(&path).unwrap();
        cache.get(&path).unwrap();
        assert!(cache.contains(&path));

        fs::write(&path, "v2").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        assert_eq!(cache.get(&path).unwrap().content().as_ref(), b"v2");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "a").unwrap();

        let cache = TtlFileCache::new(&TtlCacheSettings {
            ttl_ms: 50,
            ..Default::default()
        });
        cache.get(&path).unwrap();
        std::thread::sleep(Duration::from_millis(120));

        assert!(!cache.contains(&path));
    }

    #[test]
    fn remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let cache = TtlFileCache::new(&TtlCacheSettings {
            policy: EvictionPolicy::Memory,
            ..Default::default()
        });
        cache.get(&a).unwrap();
        cache.get(&b).unwrap();

        cache.remove(&a);
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));

        cache.clear();
        assert!(!cache.contains(&b));
    }
}
