//! Dracula client binary
//!
//! One operation per invocation: put or count over UDP, key or namespace
//! listing over TCP. Results go to stdout; anything that fails exits 1
//! with the error on stderr.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Mode};
use dracula_client::{Client, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        };
        EnvFilter::new(format!("dracula={level},dracula_client={level},dracula_common={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let tcp_servers = if cli.tcp_servers.is_empty() {
        cli.servers.clone()
    } else {
        cli.tcp_servers.clone()
    };

    let client = Arc::new(Client::new(Config {
        udp_servers: cli.servers,
        tcp_servers,
        timeout: Duration::from_secs(cli.timeout),
        pre_shared_key: cli.secret,
    })?);
    client.listen(0).await?;

    match cli.mode {
        Mode::Put => {
            client.put(&cli.namespace, &cli.key).await?;
            println!("ok");
        }
        Mode::Count => {
            let count = client.count(&cli.namespace, &cli.key).await?;
            println!("{count}");
        }
        Mode::Keys => {
            for key in client.key_match(&cli.namespace, &cli.key).await? {
                println!("{key}");
            }
        }
        Mode::Namespaces => {
            for namespace in client.list_namespaces().await? {
                println!("{namespace}");
            }
        }
    }

    client.close();
    Ok(())
}
