//! Concurrent load through the proxy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tidegate::config::schema::{LoadBalancerConfig, ReverseProxyRoute, Strategy, UpstreamConfig};

mod common;

#[tokio::test]
async fn test_load_round_robin_fairness() {
    // 1. Setup mock upstreams
    let a_addr: SocketAddr = "127.0.0.1:28491".parse().unwrap();
    let b_addr: SocketAddr = "127.0.0.1:28492".parse().unwrap();
    common::start_mock_backend(a_addr, "a").await;
    common::start_mock_backend(b_addr, "b").await;

    // 2. Setup proxy config
    let proxy_addr: SocketAddr = "127.0.0.1:28493".parse().unwrap();
    let mut config = common::base_config();
    config.reverse_proxy = vec![ReverseProxyRoute {
        enabled: true,
        id: "load".into(),
        path: "/**".into(),
        strip_prefix: false,
        timeout_ms: 5_000,
        add_headers: Default::default(),
        load_balancer: LoadBalancerConfig {
            strategy: Strategy::RoundRobin,
            upstreams: [a_addr, b_addr]
                .iter()
                .map(|addr| UpstreamConfig { url: format!("http://{}", addr), weight: 1 })
                .collect(),
            ..LoadBalancerConfig::default()
        },
    }];
    let shutdown = common::start_server(proxy_addr, config).await;

    // 3. Run load
    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = format!("http://{}/load", proxy_addr);
        tasks.push(tokio::spawn(async move {
            let mut names = Vec::new();
            for _ in 0..requests_per_task {
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        if let Ok(body) = res.text().await {
                            names.push(body.split(' ').next().unwrap_or_default().to_string());
                        }
                    }
                }
            }
            names
        }));
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        for name in task.await.unwrap() {
            *counts.entry(name).or_default() += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "{} requests in {:?} ({:.2} req/s), distribution {:?}",
        total_requests,
        duration,
        total_requests as f64 / duration.as_secs_f64(),
        counts
    );

    assert_eq!(counts.values().sum::<usize>(), total_requests);
    assert_eq!(counts.get("a"), Some(&(total_requests / 2)));
    assert_eq!(counts.get("b"), Some(&(total_requests / 2)));

    shutdown.trigger();
}
