//! Per-request stage chain.
//!
//! # Data Flow
//! ```text
//! HttpRequest
//!     → request id (inbound X-Request-ID or fresh UUID)
//!     → client IP and session id
//!     → rate limiter (429 on rejection)
//!     → proxy table (forward and relay) or route table (local handler)
//!     → gzip
//!     → X-Request-ID / Set-Cookie, access log, metrics
//! ```
//!
//! # Design Decisions
//! - Every failure inside a stage becomes a response here; nothing
//!   propagates to the connection loop
//! - Handler panics are caught and answered with 500
//! - Each stage reads its config snapshot once, so a reload mid-request
//!   never mixes two configurations in one stage

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use hyper::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, ALLOW, SET_COOKIE};
use hyper::{Method, StatusCode};
use uuid::Uuid;

use crate::http::request::{HttpRequest, RequestContext, X_REQUEST_ID};
use crate::http::response::HttpResponse;
use crate::lifecycle::startup::ServerContext;
use crate::observability::metrics;
use crate::proxy;
use crate::routing::{Handler, RouteMatch};
use crate::security::headers;
use crate::security::rate_limit::Admission;

/// Header carrying an explicit session id.
pub const X_SESSION_ID: &str = "x-session-id";

/// Cookie carrying the visitor id.
pub const VISITOR_COOKIE: &str = "VISITOR_ID";

const VISITOR_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Try again later.";

/// Run one request through every stage and produce the response.
pub async fn handle(ctx: &ServerContext, request: HttpRequest) -> HttpResponse {
    let started = Instant::now();

    let request_id = request
        .header(X_REQUEST_ID)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let client_ip = headers::client_ip(&request);
    let session_id = request
        .header(X_SESSION_ID)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| request.cookie(VISITOR_COOKIE));
    let issued_visitor = session_id.is_none().then(|| Uuid::new_v4().simple().to_string());

    let request = request.with_context(RequestContext {
        request_id: request_id.clone(),
        client_ip,
        session_id,
    });
    let method = request.method().clone();
    let path = request.path().to_string();
    let accept_encoding = request.header(ACCEPT_ENCODING.as_str()).map(str::to_string);

    let response = dispatch(ctx, request).await;
    let response = ctx.gzip.compress_response(response, accept_encoding.as_deref());

    let mut builder = response
        .into_builder()
        .header(HeaderName::from_static(X_REQUEST_ID), &request_id);
    if let Some(visitor) = issued_visitor {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly",
            VISITOR_COOKIE, visitor, VISITOR_MAX_AGE_SECS
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            builder = builder.append_header(SET_COOKIE, value);
        }
    }
    let response = builder.build();

    let elapsed = started.elapsed();
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );
    metrics::record_request(method.as_str(), response.status().as_u16(), elapsed);

    response
}

async fn dispatch(ctx: &ServerContext, request: HttpRequest) -> HttpResponse {
    let client_ip = request.context().client_ip.clone();
    if let Admission::Rejected(_) = ctx.rate_limiter.admit(request.method(), request.path(), &client_ip) {
        return HttpResponse::text(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
    }

    if let Some(route) = ctx.proxy.resolve(request.path()) {
        return match proxy::forward(&ctx.client, &route, &request).await {
            Ok(response) => response,
            Err(e) => e.to_response(),
        };
    }

    match ctx.routes.lookup(request.method(), request.path()) {
        RouteMatch::Found(handler) => run_handler(handler, request).await,
        RouteMatch::MethodNotAllowed(allowed) => {
            let allow = allow_header(&allowed);
            if request.method() == Method::OPTIONS {
                HttpResponse::builder(StatusCode::NO_CONTENT).header(ALLOW, allow).build()
            } else {
                HttpResponse::builder(StatusCode::METHOD_NOT_ALLOWED)
                    .header(ALLOW, allow)
                    .body("Method Not Allowed")
                    .build()
            }
        }
        RouteMatch::NotFound => {
            if request.method() == Method::OPTIONS {
                HttpResponse::builder(StatusCode::NO_CONTENT).header(ALLOW, "OPTIONS").build()
            } else {
                HttpResponse::text(StatusCode::NOT_FOUND, "Not Found")
            }
        }
    }
}

async fn run_handler(handler: Handler, request: HttpRequest) -> HttpResponse {
    let request_id = request.context().request_id.clone();
    match AssertUnwindSafe(handler(request)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, error = %e, "Handler failed");
            metrics::record_internal_error();
            let status = e.status();
            HttpResponse::text(status, status.canonical_reason().unwrap_or("Error"))
        }
        Err(_) => {
            tracing::error!(request_id = %request_id, "Handler panicked");
            metrics::record_internal_error();
            HttpResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// `Allow` value: registered methods, HEAD wherever GET is, and OPTIONS.
fn allow_header(allowed: &[Method]) -> String {
    let mut methods: Vec<&str> = allowed.iter().map(Method::as_str).collect();
    if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
        methods.push(Method::HEAD.as_str());
    }
    if !allowed.contains(&Method::OPTIONS) {
        methods.push(Method::OPTIONS.as_str());
    }
    methods.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RateLimitRule, RateLimitScope, ScopeParams, ServerConfig};
    use crate::lifecycle::shutdown::Shutdown;
    use crate::routing::HandlerError;
    use std::sync::Arc;

    async fn context(config: ServerConfig) -> Arc<ServerContext> {
        ServerContext::build_with(config, Shutdown::new(), |routes| {
            routes
                .get("/panic", |_req| async { panic!("handler blew up") })
                .get("/fail", |_req| async { Err(HandlerError::BadRequest("nope".into())) })
                .post("/echo", |req: HttpRequest| async move {
                    Ok(HttpResponse::text(StatusCode::OK, req.body().clone()))
                })
        })
        .await
        .unwrap()
    }

    fn quiet_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.static_files.web_root = std::env::temp_dir().join("tidegate-pipeline-missing-root");
        config
    }

    #[tokio::test]
    async fn assigns_request_and_visitor_ids() {
        let ctx = context(quiet_config()).await;

        let response = handle(&ctx, HttpRequest::builder(Method::GET, "/health").build()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.header("x-request-id").is_some());
        assert!(response.header("set-cookie").unwrap().starts_with("VISITOR_ID="));

        let known = HttpRequest::builder(Method::GET, "/health")
            .header("X-Request-ID", "req-1")
            .header("Cookie", "VISITOR_ID=abc")
            .build();
        let response = handle(&ctx, known).await;
        assert_eq!(response.header("x-request-id"), Some("req-1"));
        assert!(response.header("set-cookie").is_none());
    }

    #[tokio::test]
    async fn handler_failures_become_responses() {
        let ctx = context(quiet_config()).await;

        let panicked = handle(&ctx, HttpRequest::builder(Method::GET, "/panic").build()).await;
        assert_eq!(panicked.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let failed = handle(&ctx, HttpRequest::builder(Method::GET, "/fail").build()).await;
        assert_eq!(failed.status(), StatusCode::BAD_REQUEST);

        let echoed = handle(&ctx, HttpRequest::builder(Method::POST, "/echo").body("hi").build()).await;
        assert_eq!(echoed.body().as_ref(), b"hi");
    }

    #[tokio::test]
    async fn method_handling() {
        let ctx = context(quiet_config()).await;

        let options = handle(&ctx, HttpRequest::builder(Method::OPTIONS, "/echo").build()).await;
        assert_eq!(options.status(), StatusCode::NO_CONTENT);
        assert_eq!(options.header("allow"), Some("POST, GET, HEAD, OPTIONS"));

        let wrong = handle(&ctx, HttpRequest::builder(Method::DELETE, "/index.html").build()).await;
        assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(wrong.header("allow"), Some("GET, HEAD, OPTIONS"));
    }

    #[tokio::test]
    async fn negotiates_gzip_from_accept_encoding() {
        let ctx = context(quiet_config()).await;
        let body = "z".repeat(4096);

        let plain = handle(&ctx, HttpRequest::builder(Method::POST, "/echo").body(body.clone()).build()).await;
        assert_eq!(plain.header("content-encoding"), None);
        assert_eq!(plain.body().len(), 4096);

        let request = HttpRequest::builder(Method::POST, "/echo")
            .header("Accept-Encoding", "br, GZIP;q=0.8")
            .body(body)
            .build();
        let compressed = handle(&ctx, request).await;
        assert_eq!(compressed.header("content-encoding"), Some("gzip"));
        assert!(compressed.body().len() < 4096);
    }

    #[tokio::test]
    async fn rate_limited_requests_get_429() {
        let mut config = quiet_config();
        config.rate_limit.enabled = true;
        config.rate_limit.ip_uri = ScopeParams { capacity: 1.0, rate: 0.001 };
        config.rate_limit.rules = vec![RateLimitRule {
            enabled: true,
            method: "GET".into(),
            path: "/health".into(),
            scopes: vec![RateLimitScope::IpUri],
        }];
        let ctx = context(config).await;

        let request = || {
            HttpRequest::builder(Method::GET, "/health")
                .header("X-Forwarded-For", "198.51.100.7")
                .build()
        };
        assert_eq!(handle(&ctx, request()).await.status(), StatusCode::OK);
        let limited = handle(&ctx, request()).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.body().as_ref(), RATE_LIMITED_MESSAGE.as_bytes());
    }
}
