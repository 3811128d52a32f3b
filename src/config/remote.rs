//! Remote configuration providers.
//!
//! # Responsibilities
//! - Serve config documents from an external store (`http` or `file`)
//! - Keep the last good snapshot so `load` never blocks
//! - Reconnect with backoff and swap live providers into place once the
//!   store becomes reachable
//! - Back up every live document under `sync_path` when configured
//!
//! # Data Flow
//! ```text
//! startup: MutableConfigSource(Unavailable) wrapped in a fallback chain
//!     → RemoteConnector::connect
//!         reachable   → RecoveryAction per document → update_source(live)
//!         unreachable → background loop: backoff → probe → recover
//! live provider: poll / watch → snapshot changed → ChangeCallback
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use crate::config::backup;
use crate::config::loader::ConfigError;
use crate::config::schema::{RemoteConfig, RemoteProviderKind};
use crate::config::source::{ChangeCallback, ConfigDocument, ConfigSource, MutableConfigSource};
use crate::config::watcher::WatchedFileSource;
use crate::lifecycle::shutdown::Shutdown;
use crate::resilience::backoff::calculate_backoff;

/// Last accepted copy of a remote document plus its listeners.
pub(crate) struct Snapshot<T> {
    value: RwLock<Option<T>>,
    raw: Mutex<Option<String>>,
    callbacks: Mutex<Vec<ChangeCallback>>,
}

impl<T: ConfigDocument> Snapshot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: RwLock::new(None),
            raw: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Parse `raw` and store it. Returns `Ok(false)` when the text is
    /// unchanged. A document that fails to parse leaves the snapshot as is.
    pub(crate) fn accept(&self, raw: &str) -> Result<bool, ConfigError> {
        let mut last = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(raw) {
            return Ok(false);
        }

        let parsed: T = serde_json::from_str(raw)?;
        let parsed = parsed.prepare()?;

        *self.value.write().unwrap_or_else(PoisonError::into_inner) = Some(parsed);
        *last = Some(raw.to_string());
        Ok(true)
    }

    /// Forget the document. Returns true if there was one.
    pub(crate) fn clear(&self) -> bool {
        let mut last = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        let had = last.take().is_some();
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = None;
        had
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.value.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn subscribe(&self, callback: ChangeCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub(crate) fn notify(&self) {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback();
        }
    }
}

/// Document fetched from `{endpoint}/{data_id}` and refreshed by polling.
pub struct HttpConfigSource<T> {
    url: String,
    snapshot: Arc<Snapshot<T>>,
}

impl<T: ConfigDocument> HttpConfigSource<T> {
    /// Fetch the document once, then keep polling until shutdown.
    ///
    /// Fails if the first request cannot reach the store.
    pub async fn connect(
        client: reqwest::Client,
        endpoint: &str,
        poll_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Arc<Self>, ConfigError> {
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), T::DATA_ID);
        let snapshot = Arc::new(Snapshot::new());

        match poll_once(&client, &url, &snapshot).await {
            Ok(_) => {}
            // The store answered but the document is bad: keep polling for a fix.
            Err(ConfigError::Json(e)) => {
                tracing::error!(url = %url, error = %e, "Remote document rejected");
            }
            Err(ConfigError::Validation(errors)) => {
                tracing::error!(url = %url, errors = ?errors, "Remote document rejected");
            }
            Err(e) => return Err(e),
        }

        tokio::spawn(poll_loop(
            client,
            url.clone(),
            Arc::clone(&snapshot),
            poll_interval,
            shutdown,
        ));

        Ok(Arc::new(Self { url, snapshot }))
    }
}

impl<T: ConfigDocument> ConfigSource<T> for HttpConfigSource<T> {
    fn load(&self) -> Option<T> {
        self.snapshot.get()
    }

    fn on_change(&self, callback: ChangeCallback) {
        self.snapshot.subscribe(callback);
    }

    fn name(&self) -> String {
        format!("http:{}", self.url)
    }
}

async fn poll_once<T: ConfigDocument>(
    client: &reqwest::Client,
    url: &str,
    snapshot: &Snapshot<T>,
) -> Result<bool, ConfigError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ConfigError::Remote(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(snapshot.clear());
    }
    if !status.is_success() {
        return Err(ConfigError::Remote(format!("{} returned {}", url, status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ConfigError::Remote(e.to_string()))?;
    snapshot.accept(&body)
}

async fn poll_loop<T: ConfigDocument>(
    client: reqwest::Client,
    url: String,
    snapshot: Arc<Snapshot<T>>,
    poll_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    // First tick completes immediately; the initial fetch already happened.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match poll_once(&client, &url, &snapshot).await {
                    Ok(true) => {
                        tracing::info!(url = %url, "Remote config changed");
                        snapshot.notify();
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Remote config poll failed, keeping last snapshot");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!(url = %url, "Remote config poller stopping");
                break;
            }
        }
    }
}

/// Work to redo once the remote store is reachable again.
pub trait RecoveryAction: Send + Sync {
    fn recover<'a>(&'a self, connector: &'a RemoteConnector) -> BoxFuture<'a, Result<(), ConfigError>>;

    fn name(&self) -> &'static str;
}

/// Opens a live provider for `T` and installs it into a mutable source.
pub struct SwitchToLive<T> {
    target: Arc<MutableConfigSource<T>>,
}

impl<T> SwitchToLive<T> {
    pub fn new(target: Arc<MutableConfigSource<T>>) -> Self {
        Self { target }
    }
}

impl<T: ConfigDocument> RecoveryAction for SwitchToLive<T> {
    fn recover<'a>(&'a self, connector: &'a RemoteConnector) -> BoxFuture<'a, Result<(), ConfigError>> {
        Box::pin(async move {
            let live = connector.open::<T>().await?;
            self.target.update_source(live);
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        T::DATA_ID
    }
}

/// Owns the connection to the remote store for every document.
pub struct RemoteConnector {
    settings: RemoteConfig,
    client: reqwest::Client,
    shutdown: Shutdown,
    actions: Mutex<Vec<Arc<dyn RecoveryAction>>>,
}

impl RemoteConnector {
    pub fn new(settings: RemoteConfig, shutdown: Shutdown) -> Result<Arc<Self>, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms.max(1)))
            .build()
            .map_err(|e| ConfigError::Remote(e.to_string()))?;

        Ok(Arc::new(Self {
            settings,
            client,
            shutdown,
            actions: Mutex::new(Vec::new()),
        }))
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.provider != RemoteProviderKind::None
    }

    /// Directory for local document copies, when backups are on.
    pub fn backup_dir(&self) -> Option<&Path> {
        if !self.is_enabled() {
            return None;
        }
        self.settings.sync_path.as_deref()
    }

    pub fn register(&self, action: Arc<dyn RecoveryAction>) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }

    /// Open a live provider for one document.
    pub async fn open<T: ConfigDocument>(&self) -> Result<Arc<dyn ConfigSource<T>>, ConfigError> {
        let source: Arc<dyn ConfigSource<T>> = match self.settings.provider {
            RemoteProviderKind::Http => HttpConfigSource::<T>::connect(
                self.client.clone(),
                &self.settings.endpoint,
                Duration::from_millis(self.settings.poll_interval_ms.max(1)),
                self.shutdown.subscribe(),
            )
            .await?,
            RemoteProviderKind::File => WatchedFileSource::<T>::open(Path::new(&self.settings.endpoint))?,
            RemoteProviderKind::None => {
                return Err(ConfigError::Remote("no remote provider configured".to_string()));
            }
        };

        if let Some(dir) = self.backup_dir() {
            backup::sync(
                Arc::clone(&source),
                dir,
                Duration::from_millis(self.settings.sync_interval_ms),
                self.shutdown.subscribe(),
            );
        }
        Ok(source)
    }

    /// Check whether the store answers at all.
    pub async fn probe(&self) -> Result<(), ConfigError> {
        match self.settings.provider {
            RemoteProviderKind::Http => self
                .client
                .get(&self.settings.endpoint)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| ConfigError::Remote(e.to_string())),
            RemoteProviderKind::File => {
                if Path::new(&self.settings.endpoint).is_dir() {
                    Ok(())
                } else {
                    Err(ConfigError::Remote(format!(
                        "directory '{}' not found",
                        self.settings.endpoint
                    )))
                }
            }
            RemoteProviderKind::None => {
                Err(ConfigError::Remote("no remote provider configured".to_string()))
            }
        }
    }

    /// Try to go live now. If the store is down, keep retrying in the
    /// background and return false.
    pub async fn connect(self: &Arc<Self>) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let mut pending = self
            .actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match self.recover_pending(&mut pending).await {
            Ok(()) => {
                tracing::info!(endpoint = %self.settings.endpoint, "Remote config store connected");
                true
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.settings.endpoint,
                    error = %e,
                    "Remote config store unavailable, serving local configuration"
                );
                let connector = Arc::clone(self);
                tokio::spawn(async move { connector.reconnect_loop(pending).await });
                false
            }
        }
    }

    /// Run pending actions, keeping the ones that failed.
    async fn recover_pending(
        &self,
        pending: &mut Vec<Arc<dyn RecoveryAction>>,
    ) -> Result<(), ConfigError> {
        self.probe().await?;

        let mut failed = Vec::new();
        let mut first_error = None;
        for action in pending.drain(..) {
            if let Err(e) = action.recover(self).await {
                tracing::warn!(document = action.name(), error = %e, "Recovery action failed");
                first_error.get_or_insert(e);
                failed.push(action);
            }
        }
        *pending = failed;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn reconnect_loop(self: Arc<Self>, mut pending: Vec<Arc<dyn RecoveryAction>>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt: u32 = 0;

        while !pending.is_empty() {
            attempt = attempt.saturating_add(1);
            let delay = calculate_backoff(
                attempt,
                self.settings.reconnect_base_ms,
                self.settings.reconnect_max_ms,
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return,
            }

            match self.recover_pending(&mut pending).await {
                Ok(()) => {
                    tracing::info!(attempt, endpoint = %self.settings.endpoint, "Remote config store reconnected");
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Remote config store still unavailable");
                }
            }
        }
    }
}
