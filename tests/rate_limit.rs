//! Rate limiting through the full pipeline.

use std::net::SocketAddr;

use hyper::StatusCode;
use tidegate::config::schema::{RateLimitRule, RateLimitScope, ScopeParams};
use tidegate::http::{HttpRequest, HttpResponse};

mod common;

#[tokio::test]
async fn test_rejects_after_bucket_drains() {
    let proxy_addr: SocketAddr = "127.0.0.1:28461".parse().unwrap();
    let mut config = common::base_config();
    config.rate_limit.enabled = true;
    config.rate_limit.ip_uri = ScopeParams { capacity: 2.0, rate: 0.001 };
    config.rate_limit.rules = vec![RateLimitRule {
        enabled: true,
        method: "GET".into(),
        path: "/health".into(),
        scopes: vec![RateLimitScope::IpUri],
    }];
    let shutdown = common::start_server(proxy_addr, config).await;

    let client = common::client();
    let url = format!("http://{}/health", proxy_addr);

    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    let limited = client.get(&url).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    assert_eq!(limited.text().await.unwrap(), "Rate limit exceeded. Try again later.");

    // Another client IP has its own bucket.
    let other = client
        .get(&url)
        .header("X-Forwarded-For", "203.0.113.50")
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);

    // Paths without a rule are never limited.
    for _ in 0..5 {
        let res = client.get(format!("http://{}/missing", proxy_addr)).send().await.unwrap();
        assert_eq!(res.status(), 404);
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_ip_global_bucket_refills() {
    let proxy_addr: SocketAddr = "127.0.0.1:28462".parse().unwrap();
    let mut config = common::base_config();
    config.rate_limit.enabled = true;
    config.rate_limit.ip_global = ScopeParams { capacity: 2.0, rate: 1.0 };
    config.rate_limit.rules = vec![RateLimitRule {
        enabled: true,
        method: "GET".into(),
        path: "/api".into(),
        scopes: vec![RateLimitScope::IpGlobal],
    }];
    let shutdown = common::start_server_with(proxy_addr, config, |routes| {
        routes.get("/api", |_req: HttpRequest| async {
            Ok(HttpResponse::text(StatusCode::OK, "api"))
        })
    })
    .await;

    let client = common::client();
    let url = format!("http://{}/api", proxy_addr);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(client.get(&url).send().await.unwrap().status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);

    // The bucket is keyed by client IP only, so another IP is unaffected.
    let other = client
        .get(&url)
        .header("X-Forwarded-For", "203.0.113.51")
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);

    // One token per second comes back.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let refilled = client.get(&url).send().await.unwrap();
    assert_eq!(refilled.status(), 200);
    assert_eq!(refilled.text().await.unwrap(), "api");

    shutdown.trigger();
}
