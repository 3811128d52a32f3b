//! Static file cache subsystem.
//!
//! # Data Flow
//! ```text
//! static handler (blocking pool)
//!     → manager.rs (current backend, swapped on reload)
//!     → backend.get(path)
//!         hit & mtime unchanged → cached bytes
//!         miss / stale          → read disk → insert → bytes
//! ```
//!
//! # Backends
//! - no_cache.rs: pass-through, used when caching is disabled
//! - lru.rs: entry- or memory-bounded LRU with cleaner and adjuster tasks
//! - ttl.rs: time-bounded cache with weight-based eviction (moka)
//!
//! # Design Decisions
//! - The trait is synchronous; callers run it on the blocking pool
//! - A cached entry is only served while the file's on-disk modification
//!   time still equals the one recorded at load time
//! - Concurrent misses on the same path may each read the file; the
//!   results are identical so the last insert wins

pub mod lru;
pub mod manager;
pub mod no_cache;
pub mod ttl;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;

pub use manager::CacheManager;

/// Error type for cache reads.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            CacheError::NotFound(path.to_path_buf())
        } else {
            CacheError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// File content as read from disk.
#[derive(Debug, Clone)]
pub struct CachedFile {
    content: Bytes,
    last_modified: SystemTime,
    mime_type: String,
    cache_time: Instant,
}

impl CachedFile {
    pub fn new(content: Bytes, last_modified: SystemTime, mime_type: String) -> Self {
        Self {
            content,
            last_modified,
            mime_type,
            cache_time: Instant::now(),
        }
    }

    /// Read a regular file from disk.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let last_modified = modified_time(path)?;
        let content = fs::read(path).map_err(|e| CacheError::from_io(path, e))?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(Bytes::from(content), last_modified, mime_type))
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn cache_time(&self) -> Instant {
        self.cache_time
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Modification time of a regular file. Directories count as missing.
pub fn modified_time(path: &Path) -> Result<SystemTime, CacheError> {
    let metadata = fs::metadata(path).map_err(|e| CacheError::from_io(path, e))?;
    if !metadata.is_file() {
        return Err(CacheError::NotFound(path.to_path_buf()));
    }
    metadata.modified().map_err(|e| CacheError::from_io(path, e))
}

/// Counters every backend reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub memory_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A static file cache backend.
pub trait StaticFileCache: Send + Sync {
    /// Content of the file at `path`, from cache when still fresh.
    ///
    /// Never returns stale bytes: a changed modification time forces a
    /// re-read.
    fn get(&self, path: &Path) -> Result<Arc<CachedFile>, CacheError>;

    fn put(&self, path: &Path, file: Arc<CachedFile>);

    fn remove(&self, path: &Path);

    fn clear(&self);

    /// Whether `path` is cached, without loading it.
    fn contains(&self, path: &Path) -> bool;

    fn stats(&self) -> CacheStats;

    fn name(&self) -> &'static str;
}
