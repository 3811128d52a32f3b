//! Local copies of remote config documents.
//!
//! # Responsibilities
//! - Write every document the remote store serves to
//!   `{sync_path}/{data_id}.json`, on change and on a fixed interval
//! - Serve that copy as a fallback source, so a store that loses a
//!   document (or a restart without the store) resumes from the last
//!   remote state instead of the startup file
//!
//! # Design Decisions
//! - Writes go to a temporary file that is renamed into place
//! - An empty store never overwrites an existing copy
//! - A copy that no longer parses or validates is ignored

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::loader::ConfigError;
use crate::config::source::{ChangeCallback, ConfigDocument, ConfigSource};

/// On-disk copy of one document.
#[derive(Debug, Clone)]
pub struct BackupFile {
    path: PathBuf,
}

impl BackupFile {
    pub fn for_document<T: ConfigDocument>(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{}.json", T::DATA_ID)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save<T: ConfigDocument>(&self, document: &T) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(document)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    /// The stored document, or `None` if there is no usable copy.
    pub fn read<T: ConfigDocument>(&self) -> Option<T> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Config backup unreadable");
                return None;
            }
        };

        match serde_json::from_str::<T>(&raw)
            .map_err(ConfigError::from)
            .and_then(T::prepare)
        {
            Ok(document) => Some(document),
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Config backup rejected");
                None
            }
        }
    }
}

/// Serves the backup copy. Never fires change callbacks.
pub struct BackupConfigSource<T> {
    file: BackupFile,
    _document: PhantomData<fn() -> T>,
}

impl<T: ConfigDocument> BackupConfigSource<T> {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: BackupFile::for_document::<T>(dir),
            _document: PhantomData,
        }
    }
}

impl<T: ConfigDocument> ConfigSource<T> for BackupConfigSource<T> {
    fn load(&self) -> Option<T> {
        self.file.read()
    }

    fn on_change(&self, _callback: ChangeCallback) {}

    fn name(&self) -> String {
        format!("backup:{}", self.file.path.display())
    }
}

/// Copy `source` into `dir` now, whenever it changes, and every
/// `interval`. Returns the periodic task, if one was started.
pub fn sync<T: ConfigDocument>(
    source: Arc<dyn ConfigSource<T>>,
    dir: &Path,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Option<JoinHandle<()>> {
    let file = Arc::new(BackupFile::for_document::<T>(dir));
    store(source.as_ref(), &file);

    let weak = Arc::downgrade(&source);
    let on_change_file = Arc::clone(&file);
    source.on_change(Arc::new(move || {
        if let Some(source) = weak.upgrade() {
            store(source.as_ref(), &on_change_file);
        }
    }));

    if interval.is_zero() {
        return None;
    }
    tracing::info!(
        document = T::DATA_ID,
        path = ?file.path(),
        interval_ms = interval.as_millis() as u64,
        "Config backup task started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => store(source.as_ref(), &file),
                _ = shutdown.recv() => {
                    tracing::debug!(document = T::DATA_ID, "Config backup task stopping");
                    break;
                }
            }
        }
    }))
}

fn store<T: ConfigDocument>(source: &dyn ConfigSource<T>, file: &BackupFile) {
    let Some(document) = source.load() else {
        return;
    };
    match file.save(&document) {
        Ok(()) => {
            tracing::debug!(source = %source.name(), path = ?file.path(), "Config document backed up");
        }
        Err(e) => {
            tracing::warn!(source = %source.name(), path = ?file.path(), error = %e, "Config backup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{GzipConfig, ReverseProxyRoute};
    use crate::config::source::tests::PushSource;
    use crate::lifecycle::shutdown::Shutdown;

    fn gzip(min: i64) -> GzipConfig {
        GzipConfig {
            enabled: true,
            min_content_length: min,
            level: 4,
        }
    }

    #[tokio::test]
    async fn copies_current_and_changed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = PushSource::new(Some(gzip(10)));
        let backup = BackupConfigSource::<GzipConfig>::new(dir.path());

        let task = sync(
            store.clone() as Arc<dyn ConfigSource<GzipConfig>>,
            dir.path(),
            Duration::ZERO,
            Shutdown::new().subscribe(),
        );
        assert!(task.is_none());
        assert_eq!(backup.load(), Some(gzip(10)));

        store.push(Some(gzip(20)));
        assert_eq!(backup.load(), Some(gzip(20)));

        // The store losing the document keeps the last copy.
        store.push(None);
        assert_eq!(backup.load(), Some(gzip(20)));
        assert!(dir.path().join("gzip.json").exists());
        assert!(!dir.path().join("gzip.json.tmp").exists());
    }

    #[tokio::test]
    async fn periodic_sync_restores_deleted_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = PushSource::new(Some(gzip(30)));
        let shutdown = Shutdown::new();

        let task = sync(
            store as Arc<dyn ConfigSource<GzipConfig>>,
            dir.path(),
            Duration::from_millis(20),
            shutdown.subscribe(),
        )
        .unwrap();

        let path = dir.path().join("gzip.json");
        fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(path.exists());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[test]
    fn invalid_copies_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let backup = BackupConfigSource::<Vec<ReverseProxyRoute>>::new(dir.path());
        assert!(backup.load().is_none());

        fs::write(dir.path().join("reverse-proxy.json"), "{ broken").unwrap();
        assert!(backup.load().is_none());

        // Parses, but a route without upstreams fails validation.
        fs::write(
            dir.path().join("reverse-proxy.json"),
            r#"[{"id": "api", "path": "/api/**"}]"#,
        )
        .unwrap();
        assert!(backup.load().is_none());
        assert!(backup.name().starts_with("backup:"));
    }
}
