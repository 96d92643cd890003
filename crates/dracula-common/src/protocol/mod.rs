//! Wire protocol definitions
//!
//! Every message is a fixed 1500-byte frame (one MTU), identical on UDP and
//! TCP. TCP additionally terminates each frame with [`STOP_SYMBOL`] so that
//! variable-length replies can be carried on a stream.
//!
//! ## Frame layout
//!
//! ```text
//! offset 0      command byte
//! offset 1      space
//! offset 2..10  authentication tag, u64 little-endian
//! offset 10     space
//! offset 11..15 message id, u32 little-endian
//! offset 15     space
//! offset 16..80 namespace, 64 bytes right-padded with ASCII space
//! offset 80     space
//! offset 81..   data value, 1419 bytes right-padded with ASCII space
//! ```

mod codec;
mod packet;

pub use codec::FrameCodec;
pub use packet::Packet;

use std::fmt;

/// Total frame size, exactly one conservative MTU.
pub const PACKET_SIZE: usize = 1500;
/// Fixed width of the namespace slot.
pub const NAMESPACE_SIZE: usize = 64;
/// Fixed width of the data-value slot: what is left of the MTU after the
/// header fields and delimiters.
pub const DATA_VALUE_SIZE: usize = 1419;

/// Terminates a frame on TCP transport.
pub const STOP_SYMBOL: &[u8] = b"\n.\n";

pub(crate) const SPACE: u8 = b' ';

pub(crate) const HASH_OFFSET: usize = 2;
pub(crate) const MESSAGE_ID_OFFSET: usize = 11;
pub(crate) const NAMESPACE_OFFSET: usize = 16;
pub(crate) const DATA_VALUE_OFFSET: usize = 81;

/// Offsets that must hold an ASCII space in a well-formed frame.
pub(crate) const DELIMITER_OFFSETS: [usize; 4] = [1, 10, 15, 80];

/// Commands recognized on the wire. The discriminant is the literal command
/// byte at frame offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Count = b'C',
    Put = b'P',
    PutReplicate = b'R',
    CountNamespace = b'N',
    CountServer = b'S',
    /// Key-pattern match; reply is newline-joined, TCP only.
    Keys = b'K',
    /// Reserved, TCP only.
    Values = b'V',
    /// Reserved, TCP only.
    Store = b'T',
    /// Reserved, TCP only.
    Retrieve = b'I',
    /// Namespace listing; reply is newline-joined, TCP only.
    ListNamespaces = b'L',
    /// Error reply; the data value carries the error label.
    Error = b'E',
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'C' => Some(Command::Count),
            b'P' => Some(Command::Put),
            b'R' => Some(Command::PutReplicate),
            b'N' => Some(Command::CountNamespace),
            b'S' => Some(Command::CountServer),
            b'K' => Some(Command::Keys),
            b'V' => Some(Command::Values),
            b'T' => Some(Command::Store),
            b'I' => Some(Command::Retrieve),
            b'L' => Some(Command::ListNamespaces),
            b'E' => Some(Command::Error),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Commands a server accepts and dispatches.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Command::Count
                | Command::Put
                | Command::PutReplicate
                | Command::CountNamespace
                | Command::CountServer
                | Command::Keys
                | Command::ListNamespaces
        )
    }

    /// Commands a client accepts as a reply. Any request is acked back with
    /// its own command byte, and errors come back as [`Command::Error`].
    pub fn is_response(self) -> bool {
        self == Command::Error || self.is_request()
    }

    /// Commands whose replies exceed a single datagram and therefore only
    /// run over TCP.
    pub fn is_tcp_only(self) -> bool {
        matches!(
            self,
            Command::Keys
                | Command::Values
                | Command::Store
                | Command::Retrieve
                | Command::ListNamespaces
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_adds_up() {
        assert_eq!(
            DATA_VALUE_OFFSET + DATA_VALUE_SIZE,
            PACKET_SIZE,
            "data slot must run to the end of the frame"
        );
        assert_eq!(NAMESPACE_OFFSET + NAMESPACE_SIZE, DELIMITER_OFFSETS[3]);
    }

    #[test]
    fn test_command_byte_roundtrip() {
        for b in [
            b'C', b'P', b'R', b'N', b'S', b'K', b'V', b'T', b'I', b'L', b'E',
        ] {
            let cmd = Command::from_byte(b).unwrap();
            assert_eq!(cmd.as_byte(), b);
        }
        assert!(Command::from_byte(b'x').is_none());
        assert!(Command::from_byte(b' ').is_none());
    }

    #[test]
    fn test_command_classification() {
        assert!(Command::Put.is_request());
        assert!(Command::PutReplicate.is_request());
        assert!(!Command::Error.is_request());
        assert!(Command::Error.is_response());
        assert!(Command::Count.is_response());

        assert!(Command::Keys.is_tcp_only());
        assert!(Command::ListNamespaces.is_tcp_only());
        assert!(!Command::Count.is_tcp_only());
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::Count.to_string(), "C");
        assert_eq!(Command::ListNamespaces.to_string(), "L");
    }
}
