//! Connection state machine and keep-alive enforcement.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track each connection's state and last activity
//! - Count requests per connection against `max_requests`
//! - Close idle connections from a periodic sweep
//!
//! # Design Decisions
//! - The sweep only touches connections in `IdleWait`; a connection busy
//!   with a slow upstream is never cut by the idle timeout
//! - Closing is cooperative: the sweep signals the connection task, which
//!   shuts its hyper connection down gracefully
//! - Keep-alive config is one snapshot behind `ArcSwap`, re-read by the
//!   sweep on every pass so interval changes apply without a restart

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::config::schema::KeepAliveConfig;
use crate::config::source::Reloadable;
use crate::observability::metrics;

/// Global counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection lifecycle state.
///
/// ```text
/// Accepted → Reading → Processing → Writing → IdleWait → Reading ...
///                                            ↘ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Reading,
    Processing,
    Writing,
    IdleWait,
    Closed,
}

/// Why a connection ended. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed or sent a non-keep-alive request.
    Client,
    /// Served `max_requests` requests.
    MaxRequests,
    /// Idle longer than the keep-alive timeout.
    IdleTimeout,
    /// Protocol or I/O error.
    Error,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Client => "client",
            CloseReason::MaxRequests => "max_requests",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Error => "error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
struct Activity {
    state: ConnectionState,
    last_activity: Instant,
}

#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    activity: Mutex<Activity>,
    requests: AtomicU64,
    close: Notify,
}

impl ConnectionEntry {
    fn activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of open connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
    config: ArcSwap<KeepAliveConfig>,
}

impl ConnectionRegistry {
    pub fn new(config: KeepAliveConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config: ArcSwap::from_pointee(config.normalized()),
        }
    }

    pub fn keep_alive(&self) -> Arc<KeepAliveConfig> {
        self.config.load_full()
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    /// Register an accepted connection. The entry is removed when the
    /// returned handle is dropped.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> ConnectionHandle {
        let id = ConnectionId::new();
        let entry = Arc::new(ConnectionEntry {
            peer,
            activity: Mutex::new(Activity {
                state: ConnectionState::Accepted,
                last_activity: Instant::now(),
            }),
            requests: AtomicU64::new(0),
            close: Notify::new(),
        });
        self.connections.insert(id, entry.clone());
        metrics::set_active_connections(self.connections.len());
        tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection registered");

        ConnectionHandle {
            id,
            entry,
            registry: Arc::clone(self),
        }
    }

    /// Signal every idle connection whose keep-alive deadline passed before
    /// `now`. Returns how many were signalled.
    pub fn sweep(&self, now: Instant) -> usize {
        let timeout = Duration::from_secs(self.config.load().timeout_secs);
        let mut closed = 0;
        for item in self.connections.iter() {
            let entry = item.value();
            let mut activity = entry.activity();
            if activity.state == ConnectionState::IdleWait
                && now.saturating_duration_since(activity.last_activity) >= timeout
            {
                activity.state = ConnectionState::Closed;
                drop(activity);
                entry.close.notify_one();
                closed += 1;
                tracing::debug!(connection_id = %item.key(), peer_addr = %entry.peer, "Closing idle connection");
            }
        }
        if closed > 0 {
            tracing::info!(closed, "Idle sweep closed connections");
        }
        closed
    }

    /// Run [`sweep`](Self::sweep) every `check_interval_secs` until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = Duration::from_secs(registry.config.load().check_interval_secs);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        registry.sweep(Instant::now());
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Idle sweep received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

impl Reloadable<KeepAliveConfig> for ConnectionRegistry {
    fn reload(&self, config: Option<KeepAliveConfig>) {
        let Some(config) = config else {
            tracing::warn!("No keep-alive configuration available, keeping current settings");
            return;
        };
        let config = config.normalized();
        if *self.config.load_full() == config {
            return;
        }
        tracing::info!(
            enabled = config.enabled,
            timeout_secs = config.timeout_secs,
            max_requests = config.max_requests,
            check_interval_secs = config.check_interval_secs,
            "Keep-alive configuration refreshed"
        );
        self.config.store(Arc::new(config));
        metrics::record_config_reload("keep-alive");
    }
}

/// Decision taken when a request starts on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    /// 1-based index of this request on the connection.
    pub sequence: u64,
    /// Whether the connection may stay open after this response.
    pub keep_alive: bool,
}

/// Owned by the connection task; deregisters on drop.
pub struct ConnectionHandle {
    id: ConnectionId,
    entry: Arc<ConnectionEntry>,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.entry.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.entry.activity().state
    }

    pub fn requests(&self) -> u64 {
        self.entry.requests.load(Ordering::Relaxed)
    }

    /// Move to `state` and refresh the activity timestamp.
    pub fn transition(&self, state: ConnectionState) {
        let mut activity = self.entry.activity();
        if activity.state == ConnectionState::Closed {
            return;
        }
        activity.state = state;
        activity.last_activity = Instant::now();
    }

    /// Count a new request and decide whether the connection stays open.
    pub fn begin_request(&self, client_keep_alive: bool) -> RequestTicket {
        self.transition(ConnectionState::Reading);
        let sequence = self.entry.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let config = self.registry.config.load();
        let keep_alive = config.enabled && client_keep_alive && sequence < config.max_requests;
        RequestTicket { sequence, keep_alive }
    }

    /// Resolves once the sweep has decided to close this connection.
    pub async fn closed(&self) {
        self.entry.close.notified().await;
    }

    /// Force this connection into the closing path (tests, shutdown).
    pub fn close(&self) {
        self.entry.activity().state = ConnectionState::Closed;
        self.entry.close.notify_one();
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.entry.activity().state = ConnectionState::Closed;
        self.registry.connections.remove(&self.id);
        metrics::set_active_connections(self.registry.connections.len());
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
