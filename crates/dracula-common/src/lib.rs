//! # dracula-common
//!
//! Wire protocol for the dracula key-counter service.
//!
//! This crate contains:
//! - The fixed 1500-byte packet layout, signing and verification
//! - The stop-symbol codec used for TCP transport
//! - The protocol error taxonomy
//! - The endpoint type both sides use for server addresses
//!
//! ## Architecture
//!
//! The common crate is designed to be minimal and stable: both the server
//! and the client speak exactly what is defined here. The frame never
//! changes size, so a UDP datagram and a TCP message carry the same bytes;
//! TCP only adds a stop symbol so variable-length replies can share one
//! connection.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{ParseError, ProtocolError};
pub use protocol::{Command, Packet};
pub use types::Endpoint;
