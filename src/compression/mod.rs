//! Response compression.
//!
//! The pipeline hands every finished response to [`gzip::GzipEncoder`],
//! which compresses it when the current config and the client allow.

pub mod gzip;

pub use gzip::GzipEncoder;
