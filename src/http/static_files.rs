//! Static file handler.
//!
//! # Responsibilities
//! - Map request paths onto the web root (`/` and directories → index file)
//! - Refuse anything that resolves outside the web root
//! - Serve through the static file cache with ETag revalidation
//!
//! # Design Decisions
//! - Traversal attempts answer 404, same as a missing file
//! - Cache lookups run on the blocking pool since they may hit the disk
//! - ETag is `"<mtime-ms>-<len>"`, cheap to compute and stable across
//!   cache rebuilds

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use hyper::{Method, StatusCode};

use crate::cache::{CacheError, CacheManager, CachedFile};
use crate::config::schema::StaticFilesConfig;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::routing::matcher::normalize_path;
use crate::routing::{HandlerError, HandlerResult};

pub struct StaticFiles {
    root: PathBuf,
    index_file: String,
    cache: Arc<CacheManager>,
}

impl StaticFiles {
    pub fn new(config: &StaticFilesConfig, cache: Arc<CacheManager>) -> Self {
        Self {
            root: config.web_root.clone(),
            index_file: config.index_file.clone(),
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path on disk for a request path, or `None` if it escapes the root.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let normalized = normalize_path(request_path)?;
        let relative = normalized.trim_start_matches('/');
        let mut path = self.root.join(relative);
        if relative.is_empty() || request_path.ends_with('/') || path.is_dir() {
            path.push(&self.index_file);
        }
        Some(path)
    }

    pub async fn serve(&self, request: &HttpRequest) -> HandlerResult {
        let request_id = &request.context().request_id;
        let Some(path) = self.resolve(request.path()) else {
            tracing::warn!(request_id = %request_id, path = %request.path(), "Attempted directory traversal");
            return Ok(not_found());
        };

        let root = self.root.clone();
        let cache = Arc::clone(&self.cache);
        let lookup = tokio::task::spawn_blocking(move || -> Result<Option<Arc<CachedFile>>, CacheError> {
            if !within_root(&root, &path) {
                return Ok(None);
            }
            cache.get(&path).map(Some)
        })
        .await
        .map_err(|e| HandlerError::Internal(format!("file lookup task failed: {}", e)))?;

        let file = match lookup {
            Ok(Some(file)) => file,
            Ok(None) => {
                tracing::warn!(request_id = %request_id, path = %request.path(), "Attempted directory traversal");
                return Ok(not_found());
            }
            Err(CacheError::NotFound(_)) => return Ok(not_found()),
            Err(CacheError::Io { path, source }) => {
                tracing::error!(request_id = %request_id, path = %path.display(), error = %source, "Error serving file");
                return Err(HandlerError::Io(source));
            }
        };

        let etag = etag(&file);
        if request
            .header(IF_NONE_MATCH.as_str())
            .is_some_and(|candidates| etag_matches(candidates, &etag))
        {
            return Ok(HttpResponse::builder(StatusCode::NOT_MODIFIED)
                .header(ETAG, &etag)
                .build());
        }

        let builder = HttpResponse::builder(StatusCode::OK)
            .header(CONTENT_TYPE, file.mime_type())
            .header(ETAG, &etag);
        let response = if request.method() == Method::HEAD {
            builder.header(CONTENT_LENGTH, file.len().to_string()).build()
        } else {
            builder.body(file.content().clone()).build()
        };
        Ok(response)
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::text(StatusCode::NOT_FOUND, "Not Found")
}

/// Symlinks and `..` are resolved by the filesystem; the result must stay
/// under the root. A file that does not exist yet cannot escape.
fn within_root(root: &Path, path: &Path) -> bool {
    match (root.canonicalize(), path.canonicalize()) {
        (Ok(root), Ok(path)) => path.starts_with(root),
        (Ok(_), Err(_)) => true,
        (Err(_), _) => false,
    }
}

fn etag(file: &CachedFile) -> String {
    let millis = file
        .last_modified()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("\"{}-{}\"", millis, file.len())
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let candidates = if_none_match.trim();
    candidates == "*" || candidates.split(',').any(|c| c.trim() == etag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CacheConfig;
    use std::fs;
    use tempfile::TempDir;

    fn site() -> (TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "docs").unwrap();
        fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        let config = StaticFilesConfig {
            web_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let files = StaticFiles::new(&config, Arc::new(CacheManager::new(CacheConfig::default())));
        (dir, files)
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::builder(Method::GET, path).build()
    }

    #[tokio::test]
    async fn serves_index_and_files() {
        let (_dir, files) = site();

        let home = files.serve(&get("/")).await.unwrap();
        assert_eq!(home.status(), StatusCode::OK);
        assert_eq!(home.body().as_ref(), b"<h1>home</h1>");
        assert_eq!(home.header("content-type"), Some("text/html"));

        let docs = files.serve(&get("/docs")).await.unwrap();
        assert_eq!(docs.body().as_ref(), b"docs");

        let js = files.serve(&get("/app.js")).await.unwrap();
        assert!(js.header("content-type").unwrap().contains("javascript"));
    }

    #[tokio::test]
    async fn missing_and_traversal_are_not_found() {
        let (_dir, files) = site();
        assert_eq!(files.serve(&get("/nope.txt")).await.unwrap().status(), StatusCode::NOT_FOUND);
        assert_eq!(files.serve(&get("/../etc/passwd")).await.unwrap().status(), StatusCode::NOT_FOUND);
        assert!(files.resolve("/a/../../x").is_none());
    }

    #[tokio::test]
    async fn etag_revalidation() {
        let (_dir, files) = site();
        let first = files.serve(&get("/app.js")).await.unwrap();
        let etag = first.header("etag").unwrap().to_string();
        assert!(etag.starts_with('"') && etag.ends_with(&format!("-{}\"", "console.log(1)".len())));

        let revalidate = HttpRequest::builder(Method::GET, "/app.js")
            .header("If-None-Match", &format!("\"stale\", {}", etag))
            .build();
        let response = files.serve(&revalidate).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn head_has_length_but_no_body() {
        let (_dir, files) = site();
        let response = files
            .serve(&HttpRequest::builder(Method::HEAD, "/app.js").build())
            .await
            .unwrap();
        assert!(response.body().is_empty());
        assert_eq!(response.header("content-length"), Some("14"));
    }
}
