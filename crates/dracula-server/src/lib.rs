//! # dracula-server
//!
//! The dracula server: an in-memory, expirable key-counter reachable over
//! UDP and TCP with a fixed-frame signed protocol.
//!
//! Clients PUT opaque entry keys into namespaces; every PUT records one
//! timestamped occurrence that expires after a uniform TTL chosen at server
//! start. The server answers how many unexpired occurrences exist for a
//! key, for a namespace, or across the whole store, and can list or
//! pattern-match keys over TCP.
//!
//! The library surface exists so test harnesses and embedding binaries can
//! run servers in-process; the `dracula-server` binary wires it to flags.

pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::Server;
pub use store::Store;
