//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store the (method, pattern) → handler registration table
//! - Look up the matching handler for a request
//! - Return a matched handler or an explicit no-match
//!
//! # Design Decisions
//! - Built once at startup, immutable afterwards (shared without locks)
//! - First registration wins
//! - A path that matches under another method yields `MethodNotAllowed`
//!   so the caller can answer 405 with `Allow`

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hyper::{Method, StatusCode};

use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::routing::matcher::PathPattern;

/// Error returned by a handler. Converted to a response by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandlerError::Io(_) | HandlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type HandlerResult = Result<HttpResponse, HandlerError>;

/// Type-erased request handler.
pub type Handler = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Handler,
}

/// Result of a route lookup.
pub enum RouteMatch {
    Found(Handler),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMatch::Found(_) => f.write_str("Found"),
            RouteMatch::MethodNotAllowed(allowed) => f.debug_tuple("MethodNotAllowed").field(allowed).finish(),
            RouteMatch::NotFound => f.write_str("NotFound"),
        }
    }
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` and `pattern`.
    pub fn route<F, Fut>(mut self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |req| -> BoxFuture<'static, HandlerResult> { Box::pin(handler(req)) });
        tracing::debug!(method = %method, pattern = %pattern, "Route registered");
        self.routes.push(Route {
            method,
            pattern: PathPattern::new(pattern),
            handler,
        });
        self
    }

    pub fn get<F, Fut>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post<F, Fut>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::POST, pattern, handler)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        let mut allowed = Vec::new();
        for route in self.routes.iter().filter(|r| r.pattern.matches(path)) {
            // HEAD is served by GET handlers.
            if route.method == *method || (*method == Method::HEAD && route.method == Method::GET) {
                return RouteMatch::Found(route.handler.clone());
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }
        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            RouteMatch::MethodNotAllowed(allowed)
        }
    }
}
