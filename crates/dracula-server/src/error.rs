//! Server error types

use thiserror::Error;

use crate::config::MINIMUM_EXPIRY_SECS;

/// Errors surfaced by server construction and lifecycle operations
#[derive(Error, Debug)]
pub enum ServerError {
    // === Startup ===
    #[error("expiry is too short, minimum is {MINIMUM_EXPIRY_SECS} seconds")]
    ExpiryTooSmall,

    #[error("peers must be a comma separated list of ipaddress:port, got {0:?}")]
    BadPeerFormat(String),

    // === Lifecycle ===
    #[error("server already initialized")]
    AlreadyListening,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
