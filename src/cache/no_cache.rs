//! Pass-through backend used when caching is disabled.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::{CacheError, CacheStats, CachedFile, StaticFileCache};

/// Reads every request from disk. Maintenance calls are no-ops.
#[derive(Debug, Default)]
pub struct NoCache {
    misses: AtomicU64,
}

impl NoCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StaticFileCache for NoCache {
    fn get(&self, path: &Path) -> Result<Arc<CachedFile>, CacheError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        CachedFile::load(path).map(Arc::new)
    }

    fn put(&self, _path: &Path, _file: Arc<CachedFile>) {}

    fn remove(&self, _path: &Path) {}

    fn clear(&self) {}

    fn contains(&self, _path: &Path) -> bool {
        false
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_reads_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one").unwrap();

        let cache = NoCache::new();
        assert_eq!(cache.get(&path).unwrap().content().as_ref(), b"one");

        let file = cache.get(&path).unwrap();
        cache.put(&path, file);
        assert!(!cache.contains(&path));

        std::fs::write(&path, "two").unwrap();
        assert_eq!(cache.get(&path).unwrap().content().as_ref(), b"two");
        assert_eq!(cache.stats().misses, 3);
        assert_eq!(cache.stats().hits, 0);
    }
}
