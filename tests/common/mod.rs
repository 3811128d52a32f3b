//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tidegate::config::schema::ServerConfig;
use tidegate::lifecycle::{ServerContext, Shutdown};
use tidegate::net::Listener;
use tidegate::routing::RouteTable;
use tidegate::HttpServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Read one request head from `socket`. Returns the request line target
/// and the raw header lines.
async fn read_request_head(socket: &mut TcpStream) -> Option<(String, Vec<String>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let text = String::from_utf8_lossy(&buf).into_owned();
    let mut lines = text.split("\r\n");
    let target = lines.next()?.split(' ').nth(1)?.to_string();
    let headers = lines.take_while(|l| !l.is_empty()).map(str::to_string).collect();
    Some((target, headers))
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a mock upstream that answers every request with its `name`, the
/// path it received, and the request headers, one per line.
pub async fn start_mock_backend(addr: SocketAddr, name: &'static str) {
    start_programmable_backend(addr, move |target, headers| async move {
        (200, format!("{} {}\n{}", name, target, headers.join("\n")))
    })
    .await;
}

/// Start a programmable mock upstream. `f` receives the request target
/// and header lines.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn(String, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some((target, headers)) = read_request_head(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(target, headers).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Build the context and run a server on `addr` until the returned
/// handle is triggered.
pub async fn start_server(addr: SocketAddr, config: ServerConfig) -> Shutdown {
    start_server_with(addr, config, |routes| routes).await
}

/// Start a server with extra routes registered ahead of the static files.
pub async fn start_server_with<F>(addr: SocketAddr, mut config: ServerConfig, customize: F) -> Shutdown
where
    F: FnOnce(RouteTable) -> RouteTable,
{
    config.listener.bind_address = addr.to_string();
    let shutdown = Shutdown::new();
    let ctx = ServerContext::build_with(config.clone(), shutdown.clone(), customize)
        .await
        .unwrap();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let server = HttpServer::new(ctx);
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown
}

/// Config with no static root, the cache off and rate limiting off.
pub fn base_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.rate_limit.enabled = false;
    config.cache.enabled = false;
    config.static_files.web_root = std::env::temp_dir().join("tidegate-test-no-root");
    config
}

/// Non-pooled client so every request opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Read one HTTP/1.1 response (head and Content-Length body) from a raw
/// stream. Returns `None` on EOF before a full head.
pub async fn read_response(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&buf).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.ok()?;
    Some((head, body))
}

/// True once the peer has closed `stream`.
pub async fn is_closed(stream: &mut TcpStream, within: Duration) -> bool {
    let mut byte = [0u8; 1];
    matches!(
        tokio::time::timeout(within, stream.read(&mut byte)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}
