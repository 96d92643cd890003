//! # dracula-client
//!
//! Client for the dracula key-counter service.
//!
//! Requests are correlated by a wrapping 32-bit message id: UDP operations
//! register a pending reply sender before the datagram goes out, a single
//! receive loop completes them, and a bounded cleanup sweep times out the
//! ones whose response never arrived. Variable-length operations (key
//! matching, namespace listing) run over pooled TCP connections instead,
//! where the exclusive socket makes correlation unnecessary.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dracula_client::{Client, Config};
//!
//! # async fn example() -> Result<(), dracula_client::ClientError> {
//! let client = Arc::new(Client::new(Config {
//!     udp_servers: "127.0.0.1:3509".into(),
//!     ..Config::default()
//! })?);
//! client.listen(0).await?;
//!
//! client.put("default", "visitor:somewhere").await?;
//! let seen = client.count("default", "visitor:somewhere").await?;
//! println!("seen {seen} times");
//!
//! client.close();
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod pool;
mod tcp;
mod waiting;

pub use client::{Client, Config};
pub use error::ClientError;
pub use pool::ServerPool;

pub use dracula_common::Endpoint;
