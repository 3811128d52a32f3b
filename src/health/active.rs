//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe upstreams
//! - Update upstream health state based on results

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::USER_AGENT;
use hyper::Request;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::LoadBalanceConfig;
use crate::load_balancer::{LoadBalancer, Upstream};
use crate::proxy::forward::UpstreamClient;

const PROBE_USER_AGENT: &str = "tidegate-health-check";

/// Issues health probes against upstreams.
#[derive(Clone)]
pub struct HealthProber {
    client: UpstreamClient,
    path: String,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(client: UpstreamClient, settings: &LoadBalanceConfig) -> Self {
        let path = if settings.health_check_path.starts_with('/') {
            settings.health_check_path.clone()
        } else {
            format!("/{}", settings.health_check_path)
        };
        Self {
            client,
            path,
            timeout: Duration::from_millis(settings.health_check_timeout_ms.max(1)),
        }
    }

    /// Probe one upstream. Only a 2xx answer within the timeout counts.
    pub async fn probe(&self, upstream: &Upstream) -> bool {
        let target = upstream.target_url(&self.path);
        let request = match Request::get(&target)
            .header(USER_AGENT, PROBE_USER_AGENT)
            .body(Full::new(Bytes::new()))
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(target = %target, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(upstream = %upstream.base(), status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(upstream = %upstream.base(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(upstream = %upstream.base(), "Health check failed: timeout");
                false
            }
        }
    }
}

/// Probe `upstreams` every `interval` until shutdown.
pub async fn run(
    upstreams: Vec<Arc<Upstream>>,
    prober: HealthProber,
    balancer: Arc<dyn LoadBalancer>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        upstreams = upstreams.len(),
        "Active health checks starting"
    );

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for upstream in &upstreams {
                    if prober.probe(upstream).await {
                        if upstream.mark_healthy() {
                            balancer.reset(upstream);
                        }
                    } else {
                        upstream.mark_unhealthy();
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Active health checks received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::round_robin::RoundRobin;
    use crate::proxy::forward::build_client;
    use http_body_util::Full;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::sync::atomic::{AtomicU16, Ordering};
    use tokio::net::TcpListener;
    use url::Url;

    /// Minimal upstream answering `/health` with the status held in `status`.
    async fn spawn_health_server(status: Arc<AtomicU16>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let status = status.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let code = if req.uri().path() == "/health" {
                            status.load(Ordering::SeqCst)
                        } else {
                            404
                        };
                        async move {
                            Ok::<_, std::convert::Infallible>(
                                Response::builder()
                                    .status(StatusCode::from_u16(code).unwrap())
                                    .body(Full::new(Bytes::new()))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn prober() -> HealthProber {
        HealthProber::new(build_client(), &LoadBalanceConfig::default())
    }

    #[tokio::test]
    async fn probe_requires_2xx() {
        let status = Arc::new(AtomicU16::new(200));
        let url = spawn_health_server(status.clone()).await;
        let upstream = Upstream::new(url, 1);

        assert!(prober().probe(&upstream).await);
        status.store(503, Ordering::SeqCst);
        assert!(!prober().probe(&upstream).await);
    }

    #[tokio::test]
    async fn probe_unreachable_is_unhealthy() {
        let upstream = Upstream::new(Url::parse("http://127.0.0.1:1").unwrap(), 1);
        assert!(!prober().probe(&upstream).await);
    }

    #[tokio::test]
    async fn loop_updates_health() {
        let status = Arc::new(AtomicU16::new(500));
        let url = spawn_health_server(status.clone()).await;
        let upstream = Arc::new(Upstream::new(url, 1));
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn(run(
            vec![upstream.clone()],
            prober(),
            Arc::new(RoundRobin::new()),
            Duration::from_millis(50),
            rx,
        ));

        time::sleep(Duration::from_millis(200)).await;
        assert!(!upstream.is_healthy());

        status.store(200, Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;
        assert!(upstream.is_healthy());

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
