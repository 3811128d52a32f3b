//! Directory-backed remote provider.
//!
//! Each document lives in `{dir}/{data_id}.json`. A notify watcher on the
//! directory re-reads the file when it is created or modified and clears
//! the snapshot when it is removed, so the local fallback takes over again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::ConfigError;
use crate::config::remote::Snapshot;
use crate::config::source::{ChangeCallback, ConfigDocument, ConfigSource};

/// A config document read from disk and refreshed on file events.
pub struct WatchedFileSource<T> {
    path: PathBuf,
    snapshot: Arc<Snapshot<T>>,
    // Dropping the watcher stops the notification thread.
    _watcher: RecommendedWatcher,
}

impl<T: ConfigDocument> WatchedFileSource<T> {
    /// Read the current document (if any) and start watching `dir`.
    pub fn open(dir: &Path) -> Result<Arc<Self>, ConfigError> {
        let path = dir.join(format!("{}.json", T::DATA_ID));
        let snapshot = Arc::new(Snapshot::new());

        if path.exists() {
            if let Err(e) = reload(&path, &snapshot) {
                tracing::error!(path = ?path, error = %e, "Initial document rejected");
            }
        }

        let watcher = watch(dir, path.clone(), Arc::clone(&snapshot))?;
        tracing::info!(path = ?path, "Config document watcher started");

        Ok(Arc::new(Self {
            path,
            snapshot,
            _watcher: watcher,
        }))
    }
}

impl<T: ConfigDocument> ConfigSource<T> for WatchedFileSource<T> {
    fn load(&self) -> Option<T> {
        self.snapshot.get()
    }

    fn on_change(&self, callback: ChangeCallback) {
        self.snapshot.subscribe(callback);
    }

    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

fn reload<T: ConfigDocument>(path: &Path, snapshot: &Snapshot<T>) -> Result<bool, ConfigError> {
    let raw = fs::read_to_string(path)?;
    snapshot.accept(&raw)
}

fn watch<T: ConfigDocument>(
    dir: &Path,
    path: PathBuf,
    snapshot: Arc<Snapshot<T>>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !event.paths.iter().any(|p| p.file_name() == path.file_name()) {
                    return;
                }
                if event.kind.is_remove() {
                    if snapshot.clear() {
                        tracing::info!(path = ?path, "Config document removed");
                        snapshot.notify();
                    }
                } else if event.kind.is_modify() || event.kind.is_create() {
                    match reload(&path, &snapshot) {
                        Ok(true) => {
                            tracing::info!(path = ?path, "Config document changed, reloading...");
                            snapshot.notify();
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(
                                "Failed to reload {:?}: {}. Keeping current configuration.",
                                path,
                                e
                            );
                        }
                    }
                }
            }
            Err(e) => tracing::error!("Watch error: {:?}", e),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
