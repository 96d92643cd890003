//! The request/response engine
//!
//! One bounded channel of raw frames feeds a small pool of workers. The UDP
//! read loop and the TCP accept loop only move bytes; all protocol work
//! (parse, verify, dispatch, reply) happens on the workers, so a flood on
//! either transport backpressures at the channel instead of starving the
//! store.

mod tcp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dracula_common::protocol::PACKET_SIZE;
use dracula_common::{Command, Endpoint, Packet};
use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::store::Store;

/// A frame pulled off a transport, waiting for a worker.
pub(crate) struct RawMessage {
    pub frame: Bytes,
    pub remote: SocketAddr,
    pub reply: ReplyRoute,
}

/// Where a worker writes the answer: back out the shared UDP socket, or
/// into the originating TCP connection's writer.
pub(crate) enum ReplyRoute {
    Udp(Arc<UdpSocket>),
    Tcp(mpsc::Sender<Packet>),
}

struct Running {
    udp: Arc<UdpSocket>,
    msg_tx: flume::Sender<RawMessage>,
    loop_tasks: Vec<JoinHandle<()>>,
}

/// One dracula server instance.
pub struct Server {
    store: Arc<Store>,
    pre_shared_key: Bytes,
    peers: Vec<Endpoint>,
    running: Mutex<Option<Running>>,
    disposed: AtomicBool,
}

impl Server {
    /// Build a server from validated settings. Fails when the expiry is
    /// below the supported minimum.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let store = Arc::new(
            Store::new(config.expire_after_secs)
                .with_cleanup_denominator(config.cleanup_denominator),
        );
        Ok(Self {
            store,
            pre_shared_key: Bytes::from(config.pre_shared_key.into_bytes()),
            peers: config.peers,
            running: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// Direct access to the counting store, for embedding and tests.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The replication peer list, not including this server.
    pub fn peers(&self) -> &[Endpoint] {
        &self.peers
    }

    /// Bind both transports and start processing. Errors if the server has
    /// already listened once; instances are not reusable.
    pub async fn listen(self: &Arc<Self>, udp_port: u16, tcp_port: u16) -> Result<(), ServerError> {
        if self.disposed.load(Ordering::SeqCst) || self.running.lock().is_some() {
            return Err(ServerError::AlreadyListening);
        }

        let udp = Arc::new(UdpSocket::bind(("0.0.0.0", udp_port)).await?);
        let tcp = TcpListener::bind(("0.0.0.0", tcp_port)).await?;
        info!(
            udp = %udp.local_addr()?,
            tcp = %tcp.local_addr()?,
            "server listening"
        );

        let parallelism = host_parallelism();
        let (msg_tx, msg_rx) = flume::bounded::<RawMessage>(parallelism);

        // one extra worker so a full channel always has a drainer
        for _ in 0..=parallelism {
            let server = Arc::clone(self);
            let rx = msg_rx.clone();
            tokio::spawn(async move {
                while let Ok(msg) = rx.recv_async().await {
                    server.process(msg).await;
                }
            });
        }

        let mut loop_tasks = Vec::new();
        loop_tasks.push(self.spawn_udp_loop(udp.clone(), msg_tx.clone()));
        loop_tasks.push(self.spawn_tcp_loop(tcp, msg_tx.clone()));
        loop_tasks.push(self.store.spawn_cleanup());

        *self.running.lock() = Some(Running {
            udp,
            msg_tx,
            loop_tasks,
        });
        Ok(())
    }

    /// Stop the loops, close the channel so workers drain out, and disable
    /// the store sweep. Idempotent.
    pub fn close(&self) -> Result<(), ServerError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.store.disable_cleanup();
        if let Some(running) = self.running.lock().take() {
            for task in &running.loop_tasks {
                task.abort();
            }
            // dropping Running releases the channel sender and the sockets
        }
        Ok(())
    }

    fn spawn_udp_loop(
        self: &Arc<Self>,
        udp: Arc<UdpSocket>,
        msg_tx: flume::Sender<RawMessage>,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let mut buf = vec![0u8; PACKET_SIZE];
                match udp.recv_from(&mut buf).await {
                    Ok((n, remote)) => {
                        buf.truncate(n);
                        let msg = RawMessage {
                            frame: Bytes::from(buf),
                            remote,
                            reply: ReplyRoute::Udp(udp.clone()),
                        };
                        if msg_tx.send_async(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if server.disposed.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!("udp read error: {}", e);
                    }
                }
            }
        })
    }

    fn spawn_tcp_loop(
        self: &Arc<Self>,
        listener: TcpListener,
        msg_tx: flume::Sender<RawMessage>,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(%remote, "tcp connection accepted");
                        tokio::spawn(tcp::handle_connection(stream, remote, msg_tx.clone()));
                    }
                    Err(e) => {
                        if server.disposed.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!("tcp accept error: {}", e);
                    }
                }
            }
        })
    }

    async fn process(&self, msg: RawMessage) {
        let packet = match Packet::parse(&msg.frame) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(remote = %msg.remote, error = %err, "received bad packet");
                let reply =
                    error_reply(err.partial.as_ref(), &err.to_string(), &self.pre_shared_key);
                self.respond(&msg, reply).await;
                return;
            }
        };

        if let Err(err) = packet.verify(&self.pre_shared_key) {
            debug!(
                remote = %msg.remote,
                message_id = packet.message_id,
                "packet failed authentication"
            );
            let reply = error_reply(Some(&packet), &err.to_string(), &self.pre_shared_key);
            self.respond(&msg, reply).await;
            return;
        }

        let namespace = packet.namespace_str();
        let value = packet.data_value_str();
        let command_char = packet.command_byte() as char;
        debug!(
            remote = %msg.remote,
            command = %command_char,
            message_id = packet.message_id,
            namespace = %namespace,
            "received packet"
        );

        match packet.command() {
            Some(Command::PutReplicate) => {
                // replicated writes are applied silently: no ack, and no
                // re-replication, which is what breaks rebroadcast loops
                self.store.put(&namespace, &value);
            }
            Some(Command::Put) => {
                self.store.put(&namespace, &value);
                let reply = self.reply_to(&packet, Command::Put, b"");
                self.respond(&msg, reply).await;
                if !self.peers.is_empty() {
                    self.republish(&packet).await;
                }
            }
            Some(Command::Count) => {
                let count = self.store.count(&namespace, &value);
                let reply = self.reply_to(&packet, Command::Count, &saturating_u32(count));
                self.respond(&msg, reply).await;
            }
            Some(Command::CountNamespace) => {
                let count = self.store.count_namespace(&namespace);
                let reply =
                    self.reply_to(&packet, Command::CountNamespace, &saturating_u32(count));
                self.respond(&msg, reply).await;
            }
            Some(Command::CountServer) => {
                let count = self.store.count_server();
                let reply = self.reply_to(&packet, Command::CountServer, &saturating_u32(count));
                self.respond(&msg, reply).await;
            }
            Some(Command::Keys) => {
                let matched = self.store.key_match(&namespace, &value);
                let reply = self.reply_to(&packet, Command::Keys, matched.join("\n").as_bytes());
                self.respond(&msg, reply).await;
            }
            Some(Command::ListNamespaces) => {
                let names = self.store.list_namespaces();
                let reply =
                    self.reply_to(&packet, Command::ListNamespaces, names.join("\n").as_bytes());
                self.respond(&msg, reply).await;
            }
            _ => {
                let label = format!("unknown_command_{}", packet.command_byte() as char);
                let reply = self.reply_to(&packet, Command::Error, label.as_bytes());
                self.respond(&msg, reply).await;
            }
        }
    }

    fn reply_to(&self, request: &Packet, command: Command, data: &[u8]) -> Packet {
        Packet::from_parts(
            command,
            request.message_id,
            request.namespace(),
            data,
            &self.pre_shared_key,
        )
    }

    async fn respond(&self, msg: &RawMessage, reply: Packet) {
        match &msg.reply {
            ReplyRoute::Udp(socket) => {
                let frame = match reply.to_bytes() {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(remote = %msg.remote, error = %e, "constructing response failed");
                        return;
                    }
                };
                if let Err(e) = socket.send_to(&frame, msg.remote).await {
                    error!(remote = %msg.remote, error = %e, "udp response failed");
                }
            }
            ReplyRoute::Tcp(writer) => {
                if writer.send(reply).await.is_err() {
                    debug!(remote = %msg.remote, "tcp connection gone before response");
                }
            }
        }
    }

    /// Fan a PUT out to every peer as a replicated write. Best effort: a
    /// failed send is logged and dropped.
    async fn republish(&self, packet: &Packet) {
        let Some(udp) = self.running.lock().as_ref().map(|r| r.udp.clone()) else {
            return;
        };

        let mut copy = packet.clone();
        copy.set_command(Command::PutReplicate);
        copy.sign(&self.pre_shared_key);
        let frame = match copy.to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "reconstructing replicant packet failed");
                return;
            }
        };

        for peer in &self.peers {
            let Some(addr) = peer.socket_addr() else {
                warn!(%peer, "peer endpoint is not routable, skipping");
                continue;
            };
            match udp.send_to(&frame, addr).await {
                Ok(_) => debug!(
                    %peer,
                    message_id = copy.message_id,
                    "replicated put to peer"
                ),
                Err(e) => warn!(%peer, error = %e, "replicating to peer failed"),
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Build an error reply, addressing it with whatever header fields survived
/// parsing.
fn error_reply(partial: Option<&Packet>, label: &str, key: &[u8]) -> Packet {
    match partial {
        Some(p) => Packet::from_parts(Command::Error, p.message_id, p.namespace(), label.as_bytes(), key),
        None => Packet::from_parts(Command::Error, 0, b"", label.as_bytes(), key),
    }
}

fn saturating_u32(count: usize) -> [u8; 4] {
    (count.min(u32::MAX as usize) as u32).to_le_bytes()
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_new_rejects_short_expiry() {
        assert!(matches!(
            Server::new(ServerConfig::new(1, "")),
            Err(ServerError::ExpiryTooSmall)
        ));
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let server = Arc::new(Server::new(ServerConfig::new(60, "")).unwrap());
        server.listen(0, 0).await.unwrap();
        assert!(matches!(
            server.listen(0, 0).await,
            Err(ServerError::AlreadyListening)
        ));
        server.close().unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = Arc::new(Server::new(ServerConfig::new(60, "")).unwrap());
        server.listen(0, 0).await.unwrap();
        server.close().unwrap();
        server.close().unwrap();
        // a closed server cannot come back
        assert!(server.listen(0, 0).await.is_err());
    }

    #[test]
    fn test_saturating_u32() {
        assert_eq!(saturating_u32(5), 5u32.to_le_bytes());
        assert_eq!(
            saturating_u32(u32::MAX as usize + 10),
            u32::MAX.to_le_bytes()
        );
    }

    #[test]
    fn test_error_reply_without_partial_targets_id_zero() {
        let reply = error_reply(None, "bad packet: too small, size must be 1500 bytes", b"");
        assert_eq!(reply.message_id, 0);
        assert_eq!(reply.command(), Some(Command::Error));
        assert_eq!(
            reply.data_value_str(),
            "bad packet: too small, size must be 1500 bytes"
        );
    }
}
