//! Dracula server binary
//!
//! Binds the UDP and TCP listeners, optionally serves Prometheus metrics,
//! and runs until interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;
use dracula_server::{config::ServerConfig, metrics, Server};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        EnvFilter::new(format!("dracula={level},dracula_server={level},dracula_common={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig {
        expire_after_secs: cli.ttl,
        pre_shared_key: cli.secret,
        cleanup_denominator: cli.cleanup_denominator,
        ..ServerConfig::default()
    }
    .with_peer_list(&cli.self_peer, &cli.peers)?;

    tracing::info!(
        "Starting dracula server v{}, ttl {}s",
        env!("CARGO_PKG_VERSION"),
        config.expire_after_secs
    );

    let server = Arc::new(Server::new(config)?);
    if !server.peers().is_empty() {
        tracing::info!(peers = ?server.peers(), "replication enabled");
    }

    server.listen(cli.udp, cli.tcp).await?;

    if let Some(metrics_addr) = cli.metrics {
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_addr).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.close()?;
    Ok(())
}
