//! Static file serving through the full pipeline: index mapping, cache,
//! revalidation, compression and method handling.

use std::io::Read;
use std::net::SocketAddr;

use flate2::read::GzDecoder;
use tidegate::config::schema::CacheKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;

fn web_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("www");
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::write(root.join("index.html"), format!("<html>{}</html>", "home ".repeat(400))).unwrap();
    std::fs::write(root.join("docs/index.html"), "<p>docs</p>").unwrap();
    std::fs::write(root.join("app.js"), "console.log(1);").unwrap();
    std::fs::write(dir.path().join("secret.txt"), "top secret").unwrap();
    dir
}

#[tokio::test]
async fn test_serves_index_and_revalidates() {
    let proxy_addr: SocketAddr = "127.0.0.1:28451".parse().unwrap();
    let dir = web_root();
    let mut config = common::base_config();
    config.static_files.web_root = dir.path().join("www");
    config.cache.enabled = true;
    config.cache.kind = CacheKind::Lru;
    let shutdown = common::start_server(proxy_addr, config).await;

    let client = common::client();
    let res = client.get(format!("http://{}/", proxy_addr)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers()["content-type"].to_str().unwrap().starts_with("text/html"));
    let etag = res.headers()["etag"].to_str().unwrap().to_string();
    assert!(res.text().await.unwrap().starts_with("<html>home"));

    let docs = client.get(format!("http://{}/docs/", proxy_addr)).send().await.unwrap();
    assert_eq!(docs.text().await.unwrap(), "<p>docs</p>");

    let js = client.get(format!("http://{}/app.js", proxy_addr)).send().await.unwrap();
    assert!(js.headers()["content-type"].to_str().unwrap().contains("javascript"));

    let cached = client
        .get(format!("http://{}/index.html", proxy_addr))
        .header("If-None-Match", etag.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(cached.status(), 304);
    assert!(cached.bytes().await.unwrap().is_empty());

    let missing = client.get(format!("http://{}/nope.html", proxy_addr)).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    shutdown.trigger();
}

#[tokio::test]
async fn test_gzip_negotiation() {
    let proxy_addr: SocketAddr = "127.0.0.1:28452".parse().unwrap();
    let dir = web_root();
    let mut config = common::base_config();
    config.static_files.web_root = dir.path().join("www");
    let shutdown = common::start_server(proxy_addr, config).await;

    let client = common::client();
    let url = format!("http://{}/index.html", proxy_addr);

    let plain = client.get(&url).send().await.unwrap();
    assert!(plain.headers().get("content-encoding").is_none());
    let original = plain.bytes().await.unwrap();

    let gzipped = client.get(&url).header("Accept-Encoding", "gzip").send().await.unwrap();
    assert_eq!(gzipped.headers()["content-encoding"], "gzip");
    let compressed = gzipped.bytes().await.unwrap();
    assert!(compressed.len() < original.len());
    let mut decoded = Vec::new();
    GzDecoder::new(compressed.as_ref()).read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, original.as_ref());

    // Below the threshold nothing is compressed.
    let small = client
        .get(format!("http://{}/app.js", proxy_addr))
        .header("Accept-Encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert!(small.headers().get("content-encoding").is_none());

    shutdown.trigger();
}

#[tokio::test]
async fn test_methods_and_traversal() {
    let proxy_addr: SocketAddr = "127.0.0.1:28453".parse().unwrap();
    let dir = web_root();
    let mut config = common::base_config();
    config.static_files.web_root = dir.path().join("www");
    let shutdown = common::start_server(proxy_addr, config).await;

    let client = common::client();
    let url = format!("http://{}/index.html", proxy_addr);

    let head = client.head(&url).send().await.unwrap();
    assert_eq!(head.status(), 200);
    let length: usize = head.headers()["content-length"].to_str().unwrap().parse().unwrap();
    assert!(length > 0);

    let post = client.post(&url).body("x").send().await.unwrap();
    assert_eq!(post.status(), 405);
    assert_eq!(post.headers()["allow"], "GET, HEAD, OPTIONS");

    let options = client.request(reqwest::Method::OPTIONS, &url).send().await.unwrap();
    assert_eq!(options.status(), 204);

    let health = client.get(format!("http://{}/health", proxy_addr)).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), r#"{"status":"UP"}"#);

    // Clients normalise dot segments, so send the traversal by hand.
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream
        .write_all(b"GET /../secret.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = common::read_response(&mut stream).await.unwrap();
    assert!(head.starts_with("http/1.1 404"));
    assert!(!String::from_utf8_lossy(&body).contains("top secret"));

    shutdown.trigger();
}
