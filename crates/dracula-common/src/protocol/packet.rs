//! The fixed-size frame and its signing rules
//!
//! A packet is always materialized with its namespace and data value already
//! right-padded to their slot widths, so the authentication tag is computed
//! over exactly the bytes that travel on the wire.

use bytes::{BufMut, Bytes, BytesMut};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{ParseError, ProtocolError};
use crate::protocol::{
    Command, DATA_VALUE_OFFSET, DATA_VALUE_SIZE, DELIMITER_OFFSETS, HASH_OFFSET,
    MESSAGE_ID_OFFSET, NAMESPACE_OFFSET, NAMESPACE_SIZE, PACKET_SIZE, SPACE,
};

/// One wire frame.
///
/// The command is kept as the raw byte so that a partially parsed frame can
/// still be inspected and answered; [`Packet::command`] resolves it to the
/// typed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: u8,
    /// Authentication tag as read from (or written to) the frame.
    pub hash: u64,
    /// Correlation id chosen by the requesting side.
    pub message_id: u32,
    namespace: Bytes,
    data_value: Bytes,
}

impl Packet {
    /// Build a signed packet from unpadded parts.
    pub fn new(
        command: Command,
        message_id: u32,
        namespace: &str,
        data_value: &str,
        pre_shared_key: &[u8],
    ) -> Self {
        Self::from_parts(
            command,
            message_id,
            namespace.as_bytes(),
            data_value.as_bytes(),
            pre_shared_key,
        )
    }

    /// Build a signed packet from raw field bytes. Inputs shorter than their
    /// slot are right-padded with ASCII space; longer inputs are kept as-is
    /// and will fail [`Packet::to_bytes`] with `BadOutputSize`.
    pub fn from_parts(
        command: Command,
        message_id: u32,
        namespace: &[u8],
        data_value: &[u8],
        pre_shared_key: &[u8],
    ) -> Self {
        let namespace = pad_right(namespace, NAMESPACE_SIZE);
        let data_value = pad_right(data_value, DATA_VALUE_SIZE);
        let hash = tag(pre_shared_key, message_id, &namespace, &data_value);
        Self {
            command: command.as_byte(),
            hash,
            message_id,
            namespace,
            data_value,
        }
    }

    /// The typed command, or `None` for an unrecognized byte in a frame that
    /// failed parsing.
    pub fn command(&self) -> Option<Command> {
        Command::from_byte(self.command)
    }

    /// The raw command byte, for diagnostics on bad frames.
    pub fn command_byte(&self) -> u8 {
        self.command
    }

    pub fn set_command(&mut self, command: Command) {
        self.command = command.as_byte();
    }

    /// The padded 64-byte namespace slot.
    pub fn namespace(&self) -> &[u8] {
        &self.namespace
    }

    /// The padded 1419-byte data slot.
    pub fn data_value(&self) -> &[u8] {
        &self.data_value
    }

    /// Namespace with surrounding padding removed. Padding is never
    /// semantically significant.
    pub fn namespace_str(&self) -> String {
        String::from_utf8_lossy(&self.namespace).trim().to_string()
    }

    /// Data value with surrounding padding removed.
    pub fn data_value_str(&self) -> String {
        String::from_utf8_lossy(&self.data_value).trim().to_string()
    }

    /// Recompute and store the authentication tag. The tag covers the
    /// message id, namespace and data value, not the command byte, so this
    /// is only required after one of those fields changes.
    pub fn sign(&mut self, pre_shared_key: &[u8]) {
        self.hash = tag(
            pre_shared_key,
            self.message_id,
            &self.namespace,
            &self.data_value,
        );
    }

    /// Check the stored tag against the given key.
    pub fn verify(&self, pre_shared_key: &[u8]) -> Result<(), ProtocolError> {
        let expected = tag(
            pre_shared_key,
            self.message_id,
            &self.namespace,
            &self.data_value,
        );
        if self.hash != expected {
            return Err(ProtocolError::BadHash);
        }
        Ok(())
    }

    /// Serialize to the exact 1500-byte wire frame.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        if self.namespace.len() != NAMESPACE_SIZE || self.data_value.len() != DATA_VALUE_SIZE {
            return Err(ProtocolError::BadOutputSize);
        }
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        buf.put_u8(self.command);
        buf.put_u8(SPACE);
        buf.put_u64_le(self.hash);
        buf.put_u8(SPACE);
        buf.put_u32_le(self.message_id);
        buf.put_u8(SPACE);
        buf.put_slice(&self.namespace);
        buf.put_u8(SPACE);
        buf.put_slice(&self.data_value);
        if buf.len() != PACKET_SIZE {
            return Err(ProtocolError::BadOutputSize);
        }
        Ok(buf.freeze())
    }

    /// Parse a frame. The buffer must be exactly [`PACKET_SIZE`] bytes; TCP
    /// readers pad short frames before calling this. On failure the error
    /// carries a partial packet whenever the fixed-offset fields could be
    /// read, so the caller can still address an error reply.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        // Below this there is no complete header to salvage.
        if buf.len() < DATA_VALUE_OFFSET + 1 {
            return Err(ParseError::new(ProtocolError::PacketTooSmall, None));
        }

        let hash = u64::from_le_bytes(buf[HASH_OFFSET..HASH_OFFSET + 8].try_into().unwrap());
        let message_id = u32::from_le_bytes(
            buf[MESSAGE_ID_OFFSET..MESSAGE_ID_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        let namespace =
            Bytes::copy_from_slice(&buf[NAMESPACE_OFFSET..NAMESPACE_OFFSET + NAMESPACE_SIZE]);
        let end = buf.len().min(PACKET_SIZE);
        let data_value = pad_right(&buf[DATA_VALUE_OFFSET..end], DATA_VALUE_SIZE);

        let packet = Self {
            command: buf[0],
            hash,
            message_id,
            namespace,
            data_value,
        };

        if buf.len() < PACKET_SIZE {
            return Err(ParseError::new(ProtocolError::PacketTooSmall, Some(packet)));
        }
        if buf.len() > PACKET_SIZE {
            return Err(ParseError::new(ProtocolError::PacketTooLarge, Some(packet)));
        }
        if packet.command().is_none() {
            return Err(ParseError::new(
                ProtocolError::InvalidCommandByte,
                Some(packet),
            ));
        }
        for offset in DELIMITER_OFFSETS {
            if buf[offset] != SPACE {
                return Err(ParseError::new(
                    ProtocolError::BadDelimiter(offset),
                    Some(packet),
                ));
            }
        }

        Ok(packet)
    }
}

/// Authentication tag: xxh64 over key, message id, and the padded slots.
fn tag(pre_shared_key: &[u8], message_id: u32, namespace: &[u8], data_value: &[u8]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(pre_shared_key);
    hasher.update(&message_id.to_le_bytes());
    hasher.update(namespace);
    hasher.update(data_value);
    hasher.digest()
}

/// Right-pad with ASCII space up to `size`. Oversized input is returned
/// unchanged; serialization rejects it later.
pub(crate) fn pad_right(input: &[u8], size: usize) -> Bytes {
    if input.len() >= size {
        return Bytes::copy_from_slice(input);
    }
    let mut buf = BytesMut::with_capacity(size);
    buf.put_slice(input);
    buf.resize(size, SPACE);
    buf.freeze()
}
