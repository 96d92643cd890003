//! Per-connection TCP frame handling
//!
//! Each accepted connection gets one reader task (this function) and one
//! writer task. The reader feeds decoded frames into the shared worker
//! channel; workers push replies into the writer through a small channel so
//! the connection's socket is never shared.

use std::net::SocketAddr;

use bytes::BytesMut;
use dracula_common::protocol::{FrameCodec, PACKET_SIZE, STOP_SYMBOL};
use dracula_common::Packet;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{RawMessage, ReplyRoute};
use tokio_util::codec::{Decoder, Encoder};

/// Replies a single connection will buffer before its workers block.
const REPLY_BACKLOG: usize = 8;

pub(crate) async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    msg_tx: flume::Sender<RawMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Packet>(REPLY_BACKLOG);

    // writer direction; ends when every route handle for this connection
    // is gone
    tokio::spawn(async move {
        let mut codec = FrameCodec;
        while let Some(packet) = reply_rx.recv().await {
            let mut out = BytesMut::with_capacity(PACKET_SIZE + STOP_SYMBOL.len());
            if let Err(e) = codec.encode(&packet, &mut out) {
                warn!(%remote, error = %e, "constructing tcp response failed");
                continue;
            }
            if let Err(e) = write_half.write_all(&out).await {
                debug!(%remote, error = %e, "tcp response write failed");
                break;
            }
        }
    });

    let mut codec = FrameCodec;
    let mut buf = BytesMut::with_capacity(PACKET_SIZE + STOP_SYMBOL.len());
    loop {
        match codec.decode(&mut buf) {
            Ok(Some(frame)) => {
                let msg = RawMessage {
                    frame,
                    remote,
                    reply: ReplyRoute::Tcp(reply_tx.clone()),
                };
                if msg_tx.send_async(msg).await.is_err() {
                    break; // server shut down
                }
                continue; // there may be another buffered frame
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%remote, error = %e, "tcp frame error, dropping connection");
                break;
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                debug!(%remote, error = %e, "tcp read error");
                break;
            }
        }
    }
    debug!(%remote, "tcp connection closed");
}
