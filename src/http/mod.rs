//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, keep-alive decision, body limit)
//!     → request.rs (owned request + per-request context)
//!     → pipeline.rs (rate limit, proxy or local route, gzip, access log)
//!         → static_files.rs (GET catch-all through the file cache)
//!     → response.rs (owned response → wire)
//!     → Send to client
//! ```

pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use request::{HttpRequest, RequestContext, X_REQUEST_ID};
pub use response::HttpResponse;
pub use server::HttpServer;
pub use static_files::StaticFiles;
