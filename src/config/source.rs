//! Hot-reloadable configuration sources.
//!
//! # Responsibilities
//! - Abstract "where a config document comes from" behind [`ConfigSource`]
//! - Compose a remote primary with a local fallback
//! - Allow the primary to be replaced at runtime without losing listeners
//! - Bind consumers so they rebuild their state on every change
//!
//! # Design Decisions
//! - `load` is synchronous and cheap: remote providers keep the last good
//!   snapshot in memory and refresh it from their own background task
//! - Change callbacks carry no payload; consumers call `load` again
//! - Consumers publish new state with an atomic swap, so in-flight requests
//!   keep the snapshot they started with

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::loader::ConfigError;
use crate::config::schema::{
    CacheConfig, GzipConfig, KeepAliveConfig, RateLimitRule, ReverseProxyRoute,
};
use crate::config::validation::validate_routes;

/// Callback invoked when a source has new content.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// A provider of one configuration document.
pub trait ConfigSource<T>: Send + Sync {
    /// Best available document, or `None` when this source has nothing.
    fn load(&self) -> Option<T>;

    /// Register a callback fired whenever the document changes.
    fn on_change(&self, callback: ChangeCallback);

    /// Short label for logs.
    fn name(&self) -> String;
}

/// A document that can be served by a remote provider.
pub trait ConfigDocument: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    /// Key the document is published under.
    const DATA_ID: &'static str;

    /// Normalise or reject a freshly parsed document.
    fn prepare(self) -> Result<Self, ConfigError> {
        Ok(self)
    }
}

impl ConfigDocument for CacheConfig {
    const DATA_ID: &'static str = "cache";

    fn prepare(mut self) -> Result<Self, ConfigError> {
        self.lru = self.lru.normalized();
        Ok(self)
    }
}

impl ConfigDocument for GzipConfig {
    const DATA_ID: &'static str = "gzip";

    fn prepare(self) -> Result<Self, ConfigError> {
        Ok(self.normalized())
    }
}

impl ConfigDocument for KeepAliveConfig {
    const DATA_ID: &'static str = "keep-alive";

    fn prepare(self) -> Result<Self, ConfigError> {
        Ok(self.normalized())
    }
}

impl ConfigDocument for Vec<ReverseProxyRoute> {
    const DATA_ID: &'static str = "reverse-proxy";

    fn prepare(self) -> Result<Self, ConfigError> {
        let errors = validate_routes(&self);
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

impl ConfigDocument for Vec<RateLimitRule> {
    const DATA_ID: &'static str = "rate-limit";
}

/// A component that rebuilds itself from a config document.
pub trait Reloadable<T>: Send + Sync {
    /// Apply the latest document. `None` means no source has one.
    fn reload(&self, config: Option<T>);
}

/// Refresh `consumer` now and every time `source` reports a change.
pub fn bind<T, R>(source: Arc<dyn ConfigSource<T>>, consumer: &Arc<R>)
where
    T: 'static,
    R: Reloadable<T> + 'static,
{
    consumer.reload(source.load());

    let weak: Weak<R> = Arc::downgrade(consumer);
    let src = Arc::clone(&source);
    source.on_change(Arc::new(move || {
        if let Some(consumer) = weak.upgrade() {
            consumer.reload(src.load());
        }
    }));
}

/// Static document taken from the startup file.
pub struct LocalConfigSource<T> {
    snapshot: Option<T>,
}

impl<T> LocalConfigSource<T> {
    pub fn new(snapshot: Option<T>) -> Self {
        Self { snapshot }
    }
}

impl<T: Clone + Send + Sync> ConfigSource<T> for LocalConfigSource<T> {
    fn load(&self) -> Option<T> {
        self.snapshot.clone()
    }

    fn on_change(&self, _callback: ChangeCallback) {
        // Local documents never change during the process lifetime.
    }

    fn name(&self) -> String {
        "local".to_string()
    }
}

/// Remote primary that is currently unreachable.
pub struct UnavailableSource;

impl<T> ConfigSource<T> for UnavailableSource {
    fn load(&self) -> Option<T> {
        None
    }

    fn on_change(&self, _callback: ChangeCallback) {}

    fn name(&self) -> String {
        "unavailable".to_string()
    }
}

/// Tries `primary` first and falls back to `fallback`.
pub struct FallbackConfigSource<T> {
    primary: Arc<dyn ConfigSource<T>>,
    fallback: Arc<dyn ConfigSource<T>>,
}

impl<T> FallbackConfigSource<T> {
    pub fn new(primary: Arc<dyn ConfigSource<T>>, fallback: Arc<dyn ConfigSource<T>>) -> Self {
        Self { primary, fallback }
    }
}

impl<T> ConfigSource<T> for FallbackConfigSource<T> {
    fn load(&self) -> Option<T> {
        if let Some(config) = self.primary.load() {
            return Some(config);
        }
        tracing::debug!(
            primary = %self.primary.name(),
            fallback = %self.fallback.name(),
            "Primary config source empty, using fallback"
        );
        self.fallback.load()
    }

    fn on_change(&self, callback: ChangeCallback) {
        self.primary.on_change(callback);
    }

    fn name(&self) -> String {
        format!("{} -> {}", self.primary.name(), self.fallback.name())
    }
}

struct Slot<T> {
    source: Arc<dyn ConfigSource<T>>,
    generation: u64,
}

/// A source whose backing provider can be swapped at runtime.
///
/// Callbacks registered here survive a swap: each installed provider gets a
/// single forwarder tagged with a generation number, and forwarders from
/// replaced providers are ignored.
pub struct MutableConfigSource<T> {
    current: ArcSwap<Slot<T>>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    generation: AtomicU64,
    this: Weak<MutableConfigSource<T>>,
}

impl<T: 'static> MutableConfigSource<T> {
    pub fn new(initial: Arc<dyn ConfigSource<T>>) -> Arc<Self> {
        let this = Arc::new_cyclic(|weak| Self {
            current: ArcSwap::from_pointee(Slot {
                source: Arc::clone(&initial),
                generation: 0,
            }),
            callbacks: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            this: weak.clone(),
        });
        this.install_forwarder(&initial, 0);
        this
    }

    /// Replace the backing provider and notify every listener.
    pub fn update_source(&self, source: Arc<dyn ConfigSource<T>>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.install_forwarder(&source, generation);

        let previous = self.current.swap(Arc::new(Slot {
            source: Arc::clone(&source),
            generation,
        }));
        tracing::info!(
            from = %previous.source.name(),
            to = %source.name(),
            "Config source switched"
        );
        self.notify();
    }

    /// Name of the provider currently in use.
    pub fn current_name(&self) -> String {
        self.current.load().source.name()
    }

    fn install_forwarder(&self, source: &Arc<dyn ConfigSource<T>>, generation: u64) {
        let weak = self.this.clone();
        source.on_change(Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                if this.current.load().generation == generation {
                    this.notify();
                }
            }
        }));
    }

    fn notify(&self) {
        let callbacks = match self.callbacks.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl<T: 'static> ConfigSource<T> for MutableConfigSource<T> {
    fn load(&self) -> Option<T> {
        self.current.load().source.load()
    }

    fn on_change(&self, callback: ChangeCallback) {
        match self.callbacks.lock() {
            Ok(mut guard) => guard.push(callback),
            Err(poisoned) => poisoned.into_inner().push(callback),
        }
    }

    fn name(&self) -> String {
        format!("mutable({})", self.current_name())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::RwLock;

    /// In-memory source that can be pushed to from tests.
    pub struct PushSource<T> {
        value: RwLock<Option<T>>,
        callbacks: Mutex<Vec<ChangeCallback>>,
    }

    impl<T: Clone + Send + Sync> PushSource<T> {
        pub fn new(value: Option<T>) -> Arc<Self> {
            Arc::new(Self {
                value: RwLock::new(value),
                callbacks: Mutex::new(Vec::new()),
            })
        }

        pub fn push(&self, value: Option<T>) {
            *self.value.write().unwrap() = value;
            let callbacks = self.callbacks.lock().unwrap().clone();
            for cb in callbacks {
                cb();
            }
        }
    }

    impl<T: Clone + Send + Sync> ConfigSource<T> for PushSource<T> {
        fn load(&self) -> Option<T> {
            self.value.read().unwrap().clone()
        }

        fn on_change(&self, callback: ChangeCallback) {
            self.callbacks.lock().unwrap().push(callback);
        }

        fn name(&self) -> String {
            "push".to_string()
        }
    }

    struct Recorder {
        seen: Mutex<Vec<Option<u32>>>,
    }

    impl Reloadable<u32> for Recorder {
        fn reload(&self, config: Option<u32>) {
            self.seen.lock().unwrap().push(config);
        }
    }

    #[test]
    fn fallback_prefers_primary() {
        let primary = PushSource::new(None);
        let local: Arc<dyn ConfigSource<u32>> = Arc::new(LocalConfigSource::new(Some(1)));
        let source = FallbackConfigSource::new(primary.clone(), local);

        assert_eq!(source.load(), Some(1));
        primary.push(Some(7));
        assert_eq!(source.load(), Some(7));
    }

    #[test]
    fn fallback_change_wired_to_primary_only() {
        let primary = PushSource::new(Some(1u32));
        let fallback = PushSource::new(Some(2u32));
        let source = FallbackConfigSource::<u32>::new(primary.clone(), fallback.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        source.on_change(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        fallback.push(Some(3));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        primary.push(Some(4));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mutable_source_keeps_callbacks_across_swap() {
        let first = PushSource::new(Some(1u32));
        let second = PushSource::new(Some(2u32));
        let mutable = MutableConfigSource::new(first.clone() as Arc<dyn ConfigSource<u32>>);

        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        bind(mutable.clone() as Arc<dyn ConfigSource<u32>>, &recorder);

        mutable.update_source(second.clone());
        second.push(Some(5));
        // Notifications from the replaced source are ignored.
        first.push(Some(9));

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![Some(1), Some(2), Some(5)]);
        assert_eq!(mutable.current_name(), "push");
    }

    #[test]
    fn bind_delivers_none_when_nothing_available() {
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        bind(Arc::new(UnavailableSource) as Arc<dyn ConfigSource<u32>>, &recorder);
        assert_eq!(recorder.seen.lock().unwrap().clone(), vec![None]);
    }
}
