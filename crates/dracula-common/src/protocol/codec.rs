//! Stop-symbol framing for TCP transport
//!
//! On a stream the 1500-byte frame is followed by [`STOP_SYMBOL`]. The
//! decoder accumulates until it sees the symbol, strips it, trims
//! surrounding whitespace, and right-pads the remainder back to the fixed
//! frame size. Parsing and verification stay with the caller so that a
//! malformed frame can still be answered with an error packet.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::protocol::packet::pad_right;
use crate::protocol::{Packet, PACKET_SIZE, STOP_SYMBOL};

/// How much a connection may buffer while hunting for a stop symbol before
/// it is cut off. A well-formed message is at most one frame plus the
/// symbol; the slack covers pipelined frames.
const MAX_BUFFERED: usize = 8 * PACKET_SIZE;

/// Codec for stop-symbol delimited frames over TCP.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        let Some(at) = find_stop(src) else {
            if src.len() > MAX_BUFFERED {
                return Err(ProtocolError::FrameOverflow(MAX_BUFFERED));
            }
            return Ok(None);
        };

        let mut message = src.split_to(at + STOP_SYMBOL.len());
        message.truncate(at);

        // Line breaks and padding around the frame carry no meaning.
        let trimmed = trim_ascii_whitespace(&message);
        Ok(Some(pad_right(trimmed, PACKET_SIZE)))
    }
}

impl Encoder<&Packet> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let frame = packet.to_bytes()?;
        dst.reserve(frame.len() + STOP_SYMBOL.len());
        dst.extend_from_slice(&frame);
        dst.extend_from_slice(STOP_SYMBOL);
        Ok(())
    }
}

fn find_stop(buf: &[u8]) -> Option<usize> {
    buf.windows(STOP_SYMBOL.len())
        .position(|window| window == STOP_SYMBOL)
}

fn trim_ascii_whitespace(buf: &[u8]) -> &[u8] {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    let end = buf
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &buf[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    fn encode(packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec.encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_appends_stop_symbol() {
        let packet = Packet::new(Command::Keys, 1, "default", "blah*", b"");
        let buf = encode(&packet);
        assert_eq!(buf.len(), PACKET_SIZE + STOP_SYMBOL.len());
        assert!(buf.ends_with(STOP_SYMBOL));
    }

    #[test]
    fn test_decode_roundtrip() {
        let packet = Packet::new(Command::Keys, 9, "default", "blah*", b"k");
        let mut buf = encode(&packet);

        let frame = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.len(), PACKET_SIZE);
        let parsed = Packet::parse(&frame).unwrap();
        assert_eq!(parsed, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_stop_symbol() {
        let packet = Packet::new(Command::Keys, 2, "ns", "k", b"");
        let full = encode(&packet);

        let mut buf = BytesMut::from(&full[..600]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[600..]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_short_frame_is_padded() {
        // A reply whose data was trimmed server-side still parses after the
        // decoder re-pads it.
        let mut short = BytesMut::new();
        let packet = Packet::new(Command::ListNamespaces, 3, "", "a\nb", b"");
        let wire = packet.to_bytes().unwrap();
        let data_end = wire.iter().rposition(|&b| b != b' ').unwrap() + 1;
        short.extend_from_slice(&wire[..data_end]);
        short.extend_from_slice(STOP_SYMBOL);

        let frame = FrameCodec.decode(&mut short).unwrap().unwrap();
        assert_eq!(frame.len(), PACKET_SIZE);
        let parsed = Packet::parse(&frame).unwrap();
        assert_eq!(parsed.data_value_str(), "a\nb");
    }

    #[test]
    fn test_decode_two_pipelined_frames() {
        let first = Packet::new(Command::Keys, 1, "ns", "x", b"");
        let second = Packet::new(Command::Keys, 2, "ns", "y", b"");
        let mut buf = encode(&first);
        buf.extend_from_slice(&encode(&second));

        let one = FrameCodec.decode(&mut buf).unwrap().unwrap();
        let two = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Packet::parse(&one).unwrap().message_id, 1);
        assert_eq!(Packet::parse(&two).unwrap().message_id, 2);
    }

    #[test]
    fn test_decode_overflow_guard() {
        let mut buf = BytesMut::from(vec![b'x'; MAX_BUFFERED + 1].as_slice());
        assert!(matches!(
            FrameCodec.decode(&mut buf),
            Err(ProtocolError::FrameOverflow(_))
        ));
    }
}
