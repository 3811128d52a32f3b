//! Tidegate server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────────────┐
//!                          │                        TIDEGATE                           │
//!                          │                                                           │
//!   Client Request         │  ┌──────────┐   ┌──────────┐   ┌────────────┐             │
//!   ───────────────────────┼─▶│   net    │──▶│   http   │──▶│  pipeline  │             │
//!                          │  │ listener │   │  server  │   │ rate limit │             │
//!                          │  │ + workers│   │keep-alive│   └─────┬──────┘             │
//!                          │  └──────────┘   └──────────┘         │                    │
//!                          │                            ┌─────────┴─────────┐          │
//!                          │                            ▼                   ▼          │
//!                          │                     ┌────────────┐     ┌──────────────┐   │
//!                          │                     │   routing  │     │    proxy     │   │
//!                          │                     │static files│     │load_balancer │───┼──▶ Upstream
//!                          │                     │  + cache   │     │canary+health │   │
//!                          │                     └─────┬──────┘     └──────┬───────┘   │
//!   Client Response        │                           ▼                   ▼           │
//!   ◀──────────────────────┼───────────────────── compression (gzip) ◀─────┘           │
//!                          │                                                           │
//!                          │  ┌─────────────────────────────────────────────────────┐  │
//!                          │  │               Cross-Cutting Concerns                │  │
//!                          │  │  ┌─────────┐ ┌──────────┐ ┌───────────┐ ┌─────────┐ │  │
//!                          │  │  │ config  │ │  remote  │ │ observa-  │ │lifecycle│ │  │
//!                          │  │  │ sources │ │ reconnect│ │  bility   │ │ signals │ │  │
//!                          │  │  └─────────┘ └──────────┘ └───────────┘ └─────────┘ │  │
//!                          │  └─────────────────────────────────────────────────────┘  │
//!                          └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use tidegate::config::schema::ServerConfig;
use tidegate::config::validation::validate_config;
use tidegate::config::{load_config, ConfigError};
use tidegate::lifecycle::signals::spawn_signal_handler;
use tidegate::lifecycle::{ServerContext, Shutdown, StartupError};
use tidegate::net::Listener;
use tidegate::observability::{logging, metrics};
use tidegate::HttpServer;

#[derive(Parser)]
#[command(name = "tidegate")]
#[command(about = "HTTP server with static files, reverse proxy and live configuration", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tidegate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, missing) = if cli.config.exists() {
        (load_config(&cli.config)?, false)
    } else {
        (ServerConfig::default(), true)
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("tidegate v{} starting", env!("CARGO_PKG_VERSION"));
    if missing {
        tracing::warn!(path = ?cli.config, "Config file not found, using built-in defaults");
    }

    validate_config(&config).map_err(|errors| StartupError::Config(ConfigError::Validation(errors)))?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        worker_mode = ?config.workers.mode,
        proxy_routes = config.reverse_proxy.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let listener_config = config.listener.clone();
    let ctx = ServerContext::build(config, shutdown.clone()).await?;

    let listener = Listener::bind(&listener_config).await.map_err(StartupError::from)?;
    spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(ctx);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
