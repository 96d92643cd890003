//! Client error types

use thiserror::Error;

use dracula_common::ProtocolError;

/// Errors surfaced to client callers
#[derive(Error, Debug)]
pub enum ClientError {
    // === Request lifecycle ===
    #[error("timed out waiting for message response")]
    MessageTimedOut,

    #[error("message ID already exists")]
    MessageIdExists,

    #[error("message expired")]
    MessageExpired,

    #[error("message not found or was garbage collected")]
    NoMessage,

    #[error("too few bytes returned in count callback")]
    CountReturnBytesTooShort,

    // === Server selection ===
    #[error("no healthy dracula udp servers")]
    NoHealthyUdpServers,

    #[error("no healthy dracula tcp servers")]
    NoHealthyTcpServers,

    // === Setup ===
    #[error("missing dracula server list on client init")]
    NoServers,

    #[error("bad server address {0:?}, expected ip:port")]
    BadServerAddress(String),

    #[error("port out of range in server address {0}")]
    PortOutOfRange(String),

    #[error("client already initialized")]
    AlreadyListening,

    #[error("client is not listening, call listen first")]
    NotListening,

    // === Remote and transport ===
    /// The server answered with an `E` packet; the label is its data value.
    #[error("{0}")]
    Server(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
