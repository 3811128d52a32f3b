//! Outbound response value and builder.
//!
//! # Responsibilities
//! - Build responses incrementally and finalize them once
//! - Let post-handler stages (compression, request id, keep-alive) reopen a
//!   response as a builder
//! - Convert to a hyper response for the wire
//!
//! # Design Decisions
//! - Bodies are fully buffered (`Bytes`) so compression can see the length
//! - `Content-Length` is derived from the body unless a stage set it
//!   explicitly (HEAD responses)

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::StatusCode;

/// A finalized response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response.
    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::builder(status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .build()
    }

    /// JSON response.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::builder(status)
            .header(CONTENT_TYPE, "application/json")
            .body(value.to_string())
            .build()
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::builder(status).build()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Reopen for modification by a later stage.
    pub fn into_builder(self) -> ResponseBuilder {
        ResponseBuilder {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }

    /// Convert to the wire representation.
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut headers = self.headers;
        let bodyless = self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
            || self.status.is_informational();
        if !bodyless && !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }

        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

/// Incremental response construction.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set a header, replacing any previous value. Values that are not
    /// valid header text are dropped.
    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => {
                tracing::debug!(header = %name, "Dropping invalid header value");
            }
        }
        self
    }

    /// Append a header value, keeping existing ones.
    pub fn append_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn remove_header(mut self, name: &HeaderName) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}
