//! upstream-relay
//!
//! A transparent single-upstream HTTP relay built with Tokio, Axum and Hyper.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                  UPSTREAM RELAY                   │
//!   Client Request    │  ┌────────┐   ┌──────────┐   ┌───────────────┐   │
//!   ──────────────────┼─▶│  http  │──▶│  target  │──▶│   headers     │   │
//!                     │  │ server │   │  mapper  │   │   filter      │   │
//!                     │  └────────┘   └──────────┘   └───────┬───────┘   │
//!                     │                                      ▼           │
//!   Client Response   │  ┌────────┐   ┌──────────┐   ┌───────────────┐   │
//!   ◀─────────────────┼──│  http  │◀──│ response │◀──│   upstream    │◀──┼── Upstream
//!                     │  │ server │   │  relay   │   │   connector   │   │
//!                     │  └────────┘   └──────────┘   └───────────────┘   │
//!                     │                                                  │
//!                     │  config · observability · lifecycle              │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use upstream_relay::config::{load_config, validate_config, ConfigError, ProxyConfig};
use upstream_relay::lifecycle::{shutdown_on_signal, Shutdown};
use upstream_relay::observability::{logging, metrics};
use upstream_relay::{HttpServer, Proxy};

#[derive(Parser, Debug)]
#[command(name = "upstream-relay")]
#[command(about = "Forward every request to a single upstream", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream base URI, e.g. http://127.0.0.1:3000/api (overrides the file).
    #[arg(short, long)]
    upstream: Option<String>,

    /// Listen address (overrides the file).
    #[arg(short, long)]
    bind: Option<String>,
}

fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(upstream) = &cli.upstream {
        config.upstream.base_uri = upstream.clone();
    }
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!("upstream-relay v{} starting", env!("CARGO_PKG_VERSION"));

    let proxy = Proxy::from_config(&config)?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %proxy.target(),
        response_timeout_secs = config.timeouts.response_secs,
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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    HttpServer::new(proxy).run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
