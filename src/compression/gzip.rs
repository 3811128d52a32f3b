//! Gzip response encoding.
//!
//! # Responsibilities
//! - Decide per response whether to compress (enabled, size threshold,
//!   client `Accept-Encoding`)
//! - Encode at the configured level
//! - Fall back to the original body when encoding fails
//!
//! # Design Decisions
//! - Config is one immutable snapshot behind `ArcSwap`; a response is
//!   judged against the snapshot loaded when compression starts
//! - Responses that already carry `Content-Encoding` (e.g. relayed from an
//!   upstream) are left alone

use std::io::{self, Write};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use hyper::StatusCode;

use crate::config::schema::GzipConfig;
use crate::config::source::Reloadable;
use crate::http::response::HttpResponse;
use crate::observability::metrics;

/// Result of [`GzipEncoder::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub body: Bytes,
    pub compressed: bool,
}

pub struct GzipEncoder {
    config: ArcSwap<GzipConfig>,
}

impl GzipEncoder {
    pub fn new(config: GzipConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config.normalized()),
        }
    }

    pub fn config(&self) -> Arc<GzipConfig> {
        self.config.load_full()
    }

    /// Compress `body` if compression is enabled, the body reaches the
    /// minimum length and the client accepts gzip. Otherwise, or on
    /// encoder failure, the body is returned unchanged.
    pub fn encode(&self, body: &Bytes, accept_encoding: Option<&str>) -> Encoded {
        let config = self.config.load();
        let unchanged = || Encoded {
            body: body.clone(),
            compressed: false,
        };

        if !should_compress(&config, body.len(), accept_encoding) {
            return unchanged();
        }

        match gzip(body, config.level) {
            Ok(compressed) => Encoded {
                body: Bytes::from(compressed),
                compressed: true,
            },
            Err(e) => {
                tracing::error!(error = %e, size = body.len(), "Gzip encoding failed, sending uncompressed");
                metrics::record_internal_error();
                unchanged()
            }
        }
    }

    /// Apply [`encode`](Self::encode) to a finished response and fix up its
    /// headers.
    pub fn compress_response(&self, response: HttpResponse, accept_encoding: Option<&str>) -> HttpResponse {
        let status = response.status();
        if response.headers().contains_key(CONTENT_ENCODING)
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || response.body().is_empty()
        {
            return response;
        }

        let encoded = self.encode(response.body(), accept_encoding);
        if !encoded.compressed {
            return response;
        }

        response
            .into_builder()
            .header(CONTENT_ENCODING, "gzip")
            .header(VARY, "Accept-Encoding")
            .remove_header(&CONTENT_LENGTH)
            .body(encoded.body)
            .build()
    }
}

impl Reloadable<GzipConfig> for GzipEncoder {
    fn reload(&self, config: Option<GzipConfig>) {
        let Some(config) = config else {
            tracing::warn!("No gzip configuration available, keeping current settings");
            return;
        };

        let config = config.normalized();
        if *self.config.load_full() == config {
            return;
        }
        tracing::info!(
            enabled = config.enabled,
            min_content_length = config.min_content_length,
            level = config.level,
            "Gzip configuration refreshed"
        );
        self.config.store(Arc::new(config));
        metrics::record_config_reload("gzip");
    }
}

fn should_compress(config: &GzipConfig, len: usize, accept_encoding: Option<&str>) -> bool {
    config.enabled
        && len as i64 >= config.min_content_length
        && len > 0
        && accept_encoding
            .map(|v| v.to_ascii_lowercase().contains("gzip"))
            .unwrap_or(false)
}

fn gzip(data: &[u8], level: i32) -> io::Result<Vec<u8>> {
    let level = u32::try_from(level.clamp(0, 9)).unwrap_or(6);
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}
