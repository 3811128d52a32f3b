//! Request forwarding.
//!
//! # Responsibilities
//! - Pick an upstream from the route's pool
//! - Rewrite the request (strip prefix, hop-by-hop headers, X-Forwarded-For,
//!   configured extra headers)
//! - Relay the upstream response with a per-route timeout
//! - Report failures to the pool for passive health checking
//!
//! # Design Decisions
//! - No automatic failover to another upstream; a failed forward is
//!   answered with 502/504
//! - The upstream body is buffered so downstream stages (gzip, access log)
//!   see a complete response

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time;

use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::observability::metrics;
use crate::proxy::table::ProxyRoute;
use crate::security::headers::{end_to_end_headers, is_hop_by_hop, set_forwarded_for};

/// Shared HTTP client for forwarding and health probes.
pub type UpstreamClient = Client<HttpConnector, Full<Bytes>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn build_client() -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(connector)
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no proxy route matches {0}")]
    NoRoute(String),

    #[error("no healthy upstream for route {0}")]
    NoHealthyUpstream(String),

    #[error("failed to connect to upstream {upstream}: {source}")]
    Connect {
        upstream: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream {upstream} timed out after {timeout_ms}ms")]
    Timeout { upstream: String, timeout_ms: u64 },

    #[error("upstream {upstream} failed: {message}")]
    Upstream { upstream: String, message: String },

    #[error("invalid upstream URI {0}")]
    InvalidUri(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::NoHealthyUpstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Connect { .. } | ProxyError::Upstream { .. } | ProxyError::InvalidUri(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoRoute(_) => "no_route",
            ProxyError::NoHealthyUpstream(_) => "no_healthy_upstream",
            ProxyError::Connect { .. } => "connect",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::InvalidUri(_) => "invalid_uri",
        }
    }

    /// Whether the failure says something about the upstream's health.
    fn is_upstream_fault(&self) -> bool {
        matches!(
            self,
            ProxyError::Connect { .. } | ProxyError::Timeout { .. } | ProxyError::Upstream { .. }
        )
    }

    pub fn to_response(&self) -> HttpResponse {
        let status = self.status();
        HttpResponse::text(status, status.canonical_reason().unwrap_or("Proxy Error"))
    }
}

/// Forward `request` along `route`.
pub async fn forward(
    client: &UpstreamClient,
    route: &ProxyRoute,
    request: &HttpRequest,
) -> Result<HttpResponse, ProxyError> {
    let ctx = request.context();
    let selection = route
        .pool()
        .select(&ctx.client_ip, ctx.session_id.as_deref())
        .ok_or_else(|| ProxyError::NoHealthyUpstream(route.id().to_string()))?;

    let target = selection.upstream.target_url(&upstream_path(route, request));
    tracing::debug!(
        request_id = %ctx.request_id,
        route = %route.id(),
        target = %target,
        canary = selection.canary,
        "Forwarding request"
    );

    let result = send(client, route, request, &target, selection.upstream.base()).await;
    if let Err(e) = &result {
        tracing::error!(request_id = %ctx.request_id, route = %route.id(), error = %e, "Proxy request failed");
        metrics::record_upstream_error(e.kind());
        if e.is_upstream_fault() {
            route.pool().report_failure(&selection);
        }
    }
    result
}

/// Path and query sent upstream.
fn upstream_path(route: &ProxyRoute, request: &HttpRequest) -> String {
    if !route.config().strip_prefix {
        return request.path_and_query().to_string();
    }
    let stripped = route.pattern().strip(request.path());
    match request.query() {
        Some(query) => format!("{}?{}", stripped, query),
        None => stripped,
    }
}

async fn send(
    client: &UpstreamClient,
    route: &ProxyRoute,
    request: &HttpRequest,
    target: &str,
    upstream: &str,
) -> Result<HttpResponse, ProxyError> {
    let mut headers = end_to_end_headers(request.headers());
    set_forwarded_for(&mut headers, &request.context().client_ip);
    for (name, value) in &route.config().add_headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) if !is_hop_by_hop(&name) => {
                headers.insert(name, value);
            }
            (Ok(_), Ok(_)) => {}
            _ => tracing::warn!(route = %route.id(), header = %name, "Skipping invalid extra header"),
        }
    }

    let mut builder = Request::builder().method(request.method().clone()).uri(target);
    if let Some(h) = builder.headers_mut() {
        h.extend(headers);
    }
    let upstream_request = builder
        .body(Full::new(request.body().clone()))
        .map_err(|_| ProxyError::InvalidUri(target.to_string()))?;

    let timeout_ms = route.config().timeout_ms.max(1);
    let exchange = async {
        let response = client.request(upstream_request).await.map_err(|e| {
            if e.is_connect() {
                ProxyError::Connect { upstream: upstream.to_string(), source: e }
            } else {
                ProxyError::Upstream { upstream: upstream.to_string(), message: e.to_string() }
            }
        })?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::Upstream { upstream: upstream.to_string(), message: e.to_string() })?
            .to_bytes();
        Ok::<_, ProxyError>((parts, body))
    };

    let (parts, body) = time::timeout(Duration::from_millis(timeout_ms), exchange)
        .await
        .map_err(|_| ProxyError::Timeout { upstream: upstream.to_string(), timeout_ms })??;

    let mut response = HttpResponse::builder(parts.status).body(body);
    response.headers_mut().extend(end_to_end_headers(&parts.headers));
    Ok(response.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LoadBalancerConfig, ReverseProxyRoute, UpstreamConfig};

    fn route(path: &str, strip: bool) -> ProxyRoute {
        let config = ReverseProxyRoute {
            enabled: true,
            id: "api".into(),
            path: path.into(),
            strip_prefix: strip,
            timeout_ms: 1000,
            add_headers: Default::default(),
            load_balancer: LoadBalancerConfig {
                upstreams: vec![UpstreamConfig { url: "http://127.0.0.1:1".into(), weight: 1 }],
                ..Default::default()
            },
        };
        ProxyRoute::new(config, None)
    }

    #[test]
    fn strip_keeps_query() {
        let request = HttpRequest::builder(hyper::Method::GET, "/api/users?page=2").build();
        assert_eq!(upstream_path(&route("/api/**", true), &request), "/users?page=2");
        assert_eq!(upstream_path(&route("/api/**", false), &request), "/api/users?page=2");
    }

    #[test]
    fn error_statuses() {
        let timeout = ProxyError::Timeout { upstream: "u".into(), timeout_ms: 5 };
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ProxyError::NoHealthyUpstream("r".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ProxyError::Upstream { upstream: "u".into(), message: "reset".into() }.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(timeout.to_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn connection_refused_is_bad_gateway() {
        let route = route("/api/**", true);
        let request = HttpRequest::builder(hyper::Method::GET, "/api/x").build();
        let err = forward(&build_client(), &route, &request).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind(), "connect");
    }
}
