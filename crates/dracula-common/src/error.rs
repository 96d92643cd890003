//! Error types for the dracula wire protocol
//!
//! The `Display` strings of frame errors double as the wire-visible labels
//! carried in `E` reply packets, so they are part of the protocol surface
//! and must stay stable.

use thiserror::Error;

use crate::protocol::Packet;

/// Central error type for protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    // === Frame errors ===
    #[error("bad packet: too small, size must be 1500 bytes")]
    PacketTooSmall,

    #[error("bad packet: too large, size must be 1500 bytes")]
    PacketTooLarge,

    #[error("bad packet: invalid command byte")]
    InvalidCommandByte,

    #[error("bad packet: expected space at offset {0}")]
    BadDelimiter(usize),

    #[error("auth failed: packet hash invalid")]
    BadHash,

    // === Construction errors ===
    #[error("wrong data size during packet construction")]
    BadOutputSize,

    // === TCP framing ===
    #[error("tcp frame exceeded {0} buffered bytes without a stop symbol")]
    FrameOverflow(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A frame failed to parse, but the fixed-offset fields may still have been
/// readable. `partial` carries whatever could be salvaged so a server can
/// address an error reply by message id and namespace.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ProtocolError,
    pub partial: Option<Packet>,
}

impl ParseError {
    pub fn new(kind: ProtocolError, partial: Option<Packet>) -> Self {
        Self { kind, partial }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_labels_stable() {
        // These strings travel in E replies and are asserted by clients.
        assert_eq!(
            ProtocolError::BadHash.to_string(),
            "auth failed: packet hash invalid"
        );
        assert_eq!(
            ProtocolError::PacketTooSmall.to_string(),
            "bad packet: too small, size must be 1500 bytes"
        );
        assert_eq!(
            ProtocolError::BadDelimiter(80).to_string(),
            "bad packet: expected space at offset 80"
        );
    }
}
