//! Inbound request value.
//!
//! # Responsibilities
//! - Hold one fully-read request (method, target, version, headers, body)
//! - Carry the per-request context assigned by the pipeline (request id,
//!   client IP, session id)
//! - Answer protocol questions the lifecycle needs (keep-alive intent,
//!   accepted encodings)
//!
//! # Design Decisions
//! - Bodies are buffered up to `static_files.max_body_bytes`; requests are
//!   small and the proxy forwards them in one piece
//! - Immutable once the pipeline has attached its context

use std::net::SocketAddr;

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use hyper::{Method, Uri, Version};

/// Header used to propagate request IDs.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Context assigned to a request by the pipeline before dispatch.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    /// Session presented by the client. A freshly issued visitor id is not
    /// stored here.
    pub session_id: Option<String>,
}

/// One HTTP request, owned by the connection that read it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
    context: RequestContext,
}

impl HttpRequest {
    pub fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        body: Bytes,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            version,
            headers,
            body,
            peer_addr,
            context: RequestContext::default(),
        }
    }

    /// Start building a request by hand (tests, internal probes).
    pub fn builder(method: Method, uri: &str) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            uri: uri.parse().unwrap_or_else(|_| Uri::from_static("/")),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer_addr: None,
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path plus query string, as it should be sent upstream.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`; HTTP/1.0
    /// needs an explicit `Connection: keep-alive`.
    pub fn wants_keep_alive(&self) -> bool {
        let tokens = self
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .collect::<Vec<_>>();

        match self.version {
            Version::HTTP_10 => tokens.iter().any(|t| t == "keep-alive"),
            Version::HTTP_11 => !tokens.iter().any(|t| t == "close"),
            _ => false,
        }
    }

    /// Value of a cookie sent by the client.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(hyper::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Builder for hand-made requests.
pub struct HttpRequestBuilder {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl HttpRequestBuilder {
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Append a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn build(self) -> HttpRequest {
        HttpRequest::new(
            self.method,
            self.uri,
            self.version,
            self.headers,
            self.body,
            self.peer_addr,
        )
    }
}
