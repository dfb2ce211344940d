//! slimproto-server - Standalone SlimProto multi-room audio server.
//!
//! Accepts SlimProto (Squeezebox-protocol) client connections and serves
//! them through the synchronized-playback core in `slimproto-core`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use slimproto_core::collaborators::memory::{EmptyQueueController, InMemoryCache, NoJobsStreamingSource};
use slimproto_core::collaborators::Discovery;
use slimproto_core::{bootstrap_services, run_tcp_server, ServerConfig};
use tokio::signal;

/// Placeholder discovery beacon; a real LAN-announce implementation
/// (SSDP/mDNS) is injected here in a full deployment.
struct NoopDiscovery;

#[async_trait]
impl Discovery for NoopDiscovery {
    async fn start(
        &self,
        _bind_ip: std::net::IpAddr,
        _slimproto_port: u16,
        _cli_port: Option<u16>,
        _cli_json_ip: Option<std::net::IpAddr>,
        _server_name: &str,
        _server_id: &str,
    ) {
    }
    async fn stop(&self) {}
}

/// slimproto-server - headless SlimProto multi-room audio server.
#[derive(Parser, Debug)]
#[command(name = "slimproto-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SLIMPROTO_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// SlimProto TCP port (overrides config file).
    #[arg(short = 'p', long, env = "SLIMPROTO_PORT")]
    port: Option<u16>,

    /// Bind address (all interfaces by default).
    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    bind_address: std::net::IpAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("slimproto-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.slimproto_port = port;
    }

    log::info!(
        "configuration: slimproto_port={}, enable_discovery={}",
        config.slimproto_port,
        config.enable_discovery
    );

    // Queue control and streaming job resolution normally come from a
    // music library service; this standalone binary has none, so it runs
    // with the no-op stubs until a real library backend is wired in.
    let services = bootstrap_services(
        &config,
        Arc::new(InMemoryCache::default()),
        Arc::new(EmptyQueueController),
        Arc::new(NoJobsStreamingSource),
        Arc::new(NoopDiscovery),
    );

    log::info!("services bootstrapped successfully");

    if config.enable_discovery {
        services
            .discovery
            .start(
                args.bind_address,
                config.slimproto_port,
                None,
                None,
                "slimproto-server",
                "slimproto-server",
            )
            .await;
    }

    let bind_addr = SocketAddr::new(args.bind_address, config.slimproto_port);
    let orchestrator = Arc::clone(&services.orchestrator);
    let cancel_token = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_tcp_server(bind_addr, orchestrator, cancel_token).await {
            log::error!("server error: {e}");
        }
    });

    log::info!("slimproto server started on {bind_addr}");

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
