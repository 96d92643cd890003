//! CLI arguments for the dracula client

use clap::{Parser, ValueEnum};

/// Dracula client - put and count expirable keys
#[derive(Parser, Debug)]
#[command(name = "dracula-cli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Operation to run
    #[arg(value_enum)]
    pub mode: Mode,

    /// Comma-separated ip:port list of dracula UDP servers
    #[arg(short = 'd', long, default_value = "127.0.0.1:3509")]
    pub servers: String,

    /// Comma-separated ip:port list of dracula TCP servers; defaults to the
    /// UDP list
    #[arg(long, default_value = "")]
    pub tcp_servers: String,

    /// Namespace to operate in
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Entry key to put or count, or the pattern for keys mode
    #[arg(short, long, default_value = "")]
    pub key: String,

    /// Pre-shared key used to authenticate frames
    #[arg(short, long, env = "DRACULA_SECRET", default_value = "", hide_env_values = true)]
    pub secret: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 6)]
    pub timeout: u64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the invocation should do
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Record one occurrence of the entry key
    Put,
    /// Count unexpired occurrences of the entry key
    Count,
    /// List keys matching a * pattern (TCP)
    Keys,
    /// List every namespace (TCP)
    Namespaces,
}
