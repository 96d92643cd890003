//! CLI arguments for the dracula server

use std::net::SocketAddr;

use clap::Parser;

/// Dracula server - expirable key-counter over UDP and TCP
#[derive(Parser, Debug)]
#[command(name = "dracula-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Seconds each tracked entry lives before expiring
    #[arg(short = 't', long, default_value_t = 60)]
    pub ttl: i64,

    /// UDP port to listen on
    #[arg(short = 'u', long, default_value_t = 3509)]
    pub udp: u16,

    /// TCP port to listen on (may equal the UDP port)
    #[arg(long, default_value_t = 3509)]
    pub tcp: u16,

    /// Pre-shared key used to authenticate every frame
    #[arg(short = 's', long, env = "DRACULA_SECRET", default_value = "", hide_env_values = true)]
    pub secret: String,

    /// Comma-separated ip:port list of cluster peers to replicate PUTs to
    #[arg(short = 'p', long, default_value = "")]
    pub peers: String,

    /// This server's own ip:port as it appears in the peer list
    #[arg(short = 'i', long, default_value = "")]
    pub self_peer: String,

    /// Fraction denominator of namespaces swept per cleanup pass
    #[arg(long, default_value_t = 3)]
    pub cleanup_denominator: usize,

    /// host:port to serve Prometheus metrics on
    #[arg(short = 'm', long)]
    pub metrics: Option<SocketAddr>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
