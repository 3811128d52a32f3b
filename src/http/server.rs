//! HTTP/1.1 connection handling.
//!
//! # Responsibilities
//! - Run the accept loop and hand connections to the worker pool
//! - Drive each connection with hyper's HTTP/1.1 state machine
//! - Track connection state for the idle sweep
//! - Decide per response whether the connection stays open
//! - Drain open connections on shutdown
//!
//! # Data Flow
//! ```text
//! Listener::accept ─▶ WorkerPool::acquire ─┬─▶ serve_connection ─▶ handle_request ─▶ pipeline
//!                                         └─▶ 503 + close (saturated)
//! ```
//!
//! # Design Decisions
//! - Idle timeout is enforced by the registry sweep, not by a read timeout
//! - A response to a request that must end the connection carries
//!   `Connection: close`; hyper closes after writing it
//! - The connection reaches `IdleWait` only when hyper drops the response
//!   body, i.e. after it was written

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::header::{HeaderValue, CONNECTION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::http::pipeline;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::lifecycle::startup::ServerContext;
use crate::net::listener::{ConnectionPermit, Saturated};
use crate::net::{CloseReason, ConnectionHandle, ConnectionState, Listener, ListenerError};
use crate::observability::metrics;

const SATURATED_RESPONSE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// HTTP server bound to a [`ServerContext`].
pub struct HttpServer {
    ctx: Arc<ServerContext>,
}

impl HttpServer {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(
            address = %addr,
            worker_mode = ?self.ctx.workers.mode(),
            "HTTP server starting"
        );

        let sweeper = self.ctx.connections.spawn_sweeper(self.ctx.shutdown.subscribe());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.dispatch(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        self.drain().await;
        sweeper.abort();

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        match self.ctx.workers.acquire() {
            Ok(slot) => {
                let ctx = Arc::clone(&self.ctx);
                slot.spawn(async move {
                    let _permit = permit;
                    serve_connection(ctx, stream, peer).await;
                });
            }
            Err(Saturated) => {
                tracing::debug!(
                    peer_addr = %peer,
                    active = self.ctx.workers.active(),
                    queued = self.ctx.workers.queued(),
                    "Answering 503 to rejected connection"
                );
                let _ = stream.try_write(SATURATED_RESPONSE);
            }
        }
    }

    /// Wait for open connections to finish, up to [`DRAIN_TIMEOUT`].
    async fn drain(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            let remaining = self.ctx.connections.active_count();
            if remaining == 0 {
                tracing::info!("All connections drained");
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(remaining, "Drain timeout reached, abandoning open connections");
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

async fn serve_connection(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let handle = Arc::new(ctx.connections.register(peer));
    handle.transition(ConnectionState::IdleWait);
    let mut shutdown = ctx.shutdown.subscribe();

    let service = {
        let ctx = Arc::clone(&ctx);
        let handle = Arc::clone(&handle);
        service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            let handle = Arc::clone(&handle);
            async move { Ok::<_, Infallible>(handle_request(&ctx, handle, peer, req).await) }
        })
    };

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut requested: Option<CloseReason> = None;
    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            _ = handle.closed(), if requested.is_none() => {
                requested = Some(CloseReason::IdleTimeout);
                conn.as_mut().graceful_shutdown();
            }
            _ = shutdown.recv(), if requested.is_none() => {
                requested = Some(CloseReason::Shutdown);
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    let reason = match (result, requested) {
        (_, Some(reason)) => reason,
        (Err(e), None) => {
            tracing::debug!(connection_id = %handle.id(), error = %e, "Connection error");
            CloseReason::Error
        }
        (Ok(()), None) if handle.requests() >= ctx.connections.keep_alive().max_requests => {
            CloseReason::MaxRequests
        }
        (Ok(()), None) => CloseReason::Client,
    };

    tracing::debug!(
        connection_id = %handle.id(),
        peer_addr = %peer,
        requests = handle.requests(),
        reason = reason.as_str(),
        "Connection closed"
    );
    metrics::record_connection_closed(reason.as_str());
}

async fn handle_request(
    ctx: &ServerContext,
    conn: Arc<ConnectionHandle>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Response<ResponseBody> {
    conn.transition(ConnectionState::Reading);
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, ctx.config.static_files.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let status = if e.downcast_ref::<LengthLimitError>().is_some() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            tracing::debug!(connection_id = %conn.id(), error = %e, status = status.as_u16(), "Request body rejected");
            conn.begin_request(false);
            let response = HttpResponse::text(status, status.canonical_reason().unwrap_or("Bad Request"));
            return finish(response, conn, false);
        }
    };

    let request = HttpRequest::new(parts.method, parts.uri, parts.version, parts.headers, body, Some(peer));
    let ticket = conn.begin_request(request.wants_keep_alive());
    tracing::trace!(
        connection_id = %conn.id(),
        sequence = ticket.sequence,
        keep_alive = ticket.keep_alive,
        "Request received"
    );

    conn.transition(ConnectionState::Processing);
    let response = pipeline::handle(ctx, request).await;
    finish(response, conn, ticket.keep_alive)
}

fn finish(response: HttpResponse, conn: Arc<ConnectionHandle>, keep_alive: bool) -> Response<ResponseBody> {
    conn.transition(ConnectionState::Writing);
    let mut response = response.into_hyper();
    if !keep_alive {
        response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    }
    response.map(|inner| ResponseBody {
        inner,
        conn: Some(conn),
    })
}

/// Response body that moves its connection to `IdleWait` once hyper is
/// done with it.
struct ResponseBody {
    inner: Full<Bytes>,
    conn: Option<Arc<ConnectionHandle>>,
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.transition(ConnectionState::IdleWait);
        }
    }
}
