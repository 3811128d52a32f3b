//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from the startup configuration
//! - Wire each hot-reloadable document to its consumer
//! - Register the built-in routes (health probe, static files)
//! - Kick off the remote config connection
//!
//! # Design Decisions
//! - Fail fast: a startup error is fatal
//! - Every document starts on its local value (or its last remote copy)
//!   and switches to the remote store once it becomes reachable
//! - Rate limit rules are bound to the startup file only
//! - The listener is bound by the caller, after the context is ready

use std::sync::Arc;

use hyper::StatusCode;
use serde_json::json;
use tokio::runtime::Handle;

use crate::cache::CacheManager;
use crate::compression::GzipEncoder;
use crate::config::backup::BackupConfigSource;
use crate::config::remote::{RemoteConnector, SwitchToLive};
use crate::config::schema::{RateLimitRule, ServerConfig};
use crate::config::source::{
    bind, ConfigDocument, ConfigSource, FallbackConfigSource, LocalConfigSource,
    MutableConfigSource, Reloadable, UnavailableSource,
};
use crate::config::ConfigError;
use crate::health::HealthProber;
use crate::http::response::HttpResponse;
use crate::http::static_files::StaticFiles;
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::pool::HealthContext;
use crate::net::{ConnectionRegistry, ListenerError, WorkerPool};
use crate::proxy::{build_client, ProxyTable, UpstreamClient};
use crate::routing::RouteTable;
use crate::security::rate_limit::RateLimiter;

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
}

/// Everything a connection task needs to serve requests.
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub connections: Arc<ConnectionRegistry>,
    pub workers: WorkerPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheManager>,
    pub gzip: Arc<GzipEncoder>,
    pub proxy: Arc<ProxyTable>,
    pub routes: RouteTable,
    pub client: UpstreamClient,
    pub remote: Arc<RemoteConnector>,
    pub shutdown: Shutdown,
}

impl ServerContext {
    pub async fn build(config: ServerConfig, shutdown: Shutdown) -> Result<Arc<Self>, StartupError> {
        Self::build_with(config, shutdown, |routes| routes).await
    }

    /// Like [`build`](Self::build), letting the caller add routes ahead of
    /// the static file catch-all.
    pub async fn build_with<F>(
        config: ServerConfig,
        shutdown: Shutdown,
        customize: F,
    ) -> Result<Arc<Self>, StartupError>
    where
        F: FnOnce(RouteTable) -> RouteTable,
    {
        let remote = RemoteConnector::new(config.remote.clone(), shutdown.clone())?;
        let client = build_client();

        let connections = Arc::new(ConnectionRegistry::new(config.keep_alive.clone()));
        let workers = WorkerPool::new(&config.workers);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let cache = Arc::new(CacheManager::new(config.cache.clone()));
        let gzip = Arc::new(GzipEncoder::new(config.gzip.clone()));

        let health = HealthContext {
            runtime: Handle::current(),
            prober: HealthProber::new(client.clone(), &config.load_balance),
            settings: config.load_balance.clone(),
            shutdown: shutdown.clone(),
        };
        let proxy = Arc::new(ProxyTable::new(config.reverse_proxy.clone(), Some(health)));

        bind_document(&remote, config.cache.clone(), &cache);
        bind_document(&remote, config.gzip.clone(), &gzip);
        bind_document(&remote, config.keep_alive.clone(), &connections);
        bind_document(&remote, config.reverse_proxy.clone(), &proxy);
        let rules: Arc<dyn ConfigSource<Vec<RateLimitRule>>> =
            Arc::new(LocalConfigSource::new(Some(config.rate_limit.rules.clone())));
        bind(rules, &rate_limiter);

        let static_files = Arc::new(StaticFiles::new(&config.static_files, Arc::clone(&cache)));
        let routes = customize(RouteTable::new().get("/health", |_req| async {
            Ok(HttpResponse::json(StatusCode::OK, &json!({ "status": "UP" })))
        }))
        .get("/**", move |req| {
            let static_files = Arc::clone(&static_files);
            async move { static_files.serve(&req).await }
        });

        tracing::info!(
            routes = routes.len(),
            proxy_routes = proxy.len(),
            worker_mode = ?workers.mode(),
            remote = remote.is_enabled(),
            "Server context initialized"
        );

        if remote.is_enabled() {
            remote.connect().await;
        }

        Ok(Arc::new(Self {
            config: Arc::new(config),
            connections,
            workers,
            rate_limiter,
            cache,
            gzip,
            proxy,
            routes,
            client,
            remote,
            shutdown,
        }))
    }
}

/// Wire one document as `Fallback(live, local)` into `consumer`. The live
/// side starts unavailable and is swapped in by the remote connector. With
/// backups on, the local side prefers the last remote copy.
fn bind_document<T, R>(remote: &Arc<RemoteConnector>, local: T, consumer: &Arc<R>)
where
    T: ConfigDocument,
    R: Reloadable<T> + 'static,
{
    let live = MutableConfigSource::<T>::new(Arc::new(UnavailableSource));
    if remote.is_enabled() {
        remote.register(Arc::new(SwitchToLive::new(Arc::clone(&live))));
    }

    let live: Arc<dyn ConfigSource<T>> = live;
    let mut fallback: Arc<dyn ConfigSource<T>> = Arc::new(LocalConfigSource::new(Some(local)));
    if let Some(dir) = remote.backup_dir() {
        fallback = Arc::new(FallbackConfigSource::new(
            Arc::new(BackupConfigSource::<T>::new(dir)),
            fallback,
        ));
    }
    let source: Arc<dyn ConfigSource<T>> = Arc::new(FallbackConfigSource::new(live, fallback));
    bind(source, consumer);
}
