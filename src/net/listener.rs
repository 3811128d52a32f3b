//! TCP listener and worker dispatch.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Enforce max_connections via semaphore (backpressure on accept)
//! - Schedule accepted connections on the worker pool
//!
//! # Design Decisions
//! - Unbounded mode spawns one task per connection
//! - Bounded mode runs at most `max_workers` connections at once; up to
//!   `queue_capacity` more wait for a worker, further arrivals are rejected
//! - Permits are owned by the spawned task so a panicking handler still
//!   releases its slot

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::schema::{ListenerConfig, WorkerConfig, WorkerMode};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid bind address {0}")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("listener closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::InvalidAddress(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind {
            addr: config.bind_address.clone(),
            source,
        })?;

        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, max_connections, "Listener bound");
        }
        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, waiting while the connection limit is reached.
    /// The permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot. Released when dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Returned when the bounded pool and its queue are full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool saturated")]
pub struct Saturated;

/// Schedules connection handlers.
pub struct WorkerPool {
    mode: WorkerMode,
    workers: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    queue_capacity: usize,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(config: &WorkerConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        tracing::info!(
            mode = ?config.mode,
            max_workers,
            queue_capacity = config.queue_capacity,
            "Worker pool configured"
        );
        Self {
            mode: config.mode,
            workers: Arc::new(Semaphore::new(max_workers)),
            queued: Arc::new(AtomicUsize::new(0)),
            queue_capacity: config.queue_capacity,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn mode(&self) -> WorkerMode {
        self.mode
    }

    /// Connections currently being served.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Connections waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Reserve a worker slot without blocking.
    pub fn acquire(&self) -> Result<WorkerSlot, Saturated> {
        let kind = match self.mode {
            WorkerMode::Unbounded => SlotKind::Unbounded,
            WorkerMode::Bounded => match self.workers.clone().try_acquire_owned() {
                Ok(permit) => SlotKind::Ready(permit),
                Err(_) => {
                    if self.queued.fetch_add(1, Ordering::AcqRel) >= self.queue_capacity {
                        self.queued.fetch_sub(1, Ordering::AcqRel);
                        metrics::record_worker_rejection();
                        tracing::warn!(queue_capacity = self.queue_capacity, "Worker pool saturated, rejecting connection");
                        return Err(Saturated);
                    }
                    SlotKind::Queued {
                        workers: self.workers.clone(),
                        queued: QueueGuard(self.queued.clone()),
                    }
                }
            },
        };
        Ok(WorkerSlot {
            kind,
            active: self.active.clone(),
        })
    }
}

enum SlotKind {
    Unbounded,
    Ready(OwnedSemaphorePermit),
    Queued { workers: Arc<Semaphore>, queued: QueueGuard },
}

/// Decrements the queue length when the waiting task starts or is dropped.
struct QueueGuard(Arc<AtomicUsize>);

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tracks the active-worker gauge for one running handler.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_active_workers(now);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_active_workers(now);
    }
}

/// A reserved place in the worker pool.
pub struct WorkerSlot {
    kind: SlotKind,
    active: Arc<AtomicUsize>,
}

impl WorkerSlot {
    /// Run `task` in this slot. Queued slots wait for a worker first.
    pub fn spawn<F>(self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let _permit = match self.kind {
                SlotKind::Unbounded => None,
                SlotKind::Ready(permit) => Some(permit),
                SlotKind::Queued { workers, queued } => {
                    let permit = workers.acquire_owned().await;
                    drop(queued);
                    match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    }
                }
            };
            let _active = ActiveGuard::new(self.active);
            task.await;
        })
    }
}
