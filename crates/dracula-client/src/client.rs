//! The dracula client
//!
//! Counting operations ride UDP: the request registers a pending sender
//! keyed by message id, one receive loop completes senders as datagrams
//! arrive, and each call enforces its own deadline. Listing operations ride
//! pooled TCP connections where the reply comes back on the same socket.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use dracula_common::protocol::{FrameCodec, PACKET_SIZE, STOP_SYMBOL};
use dracula_common::{Command, Endpoint, Packet};

use crate::error::ClientError;
use crate::pool::ServerPool;
use crate::tcp::TcpPool;
use crate::waiting::{ReplySender, ResponseCache};

/// Deadline for reading one framed TCP reply.
const TCP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between health rounds while at least one server answers.
const HEALTH_INTERVAL_HEALTHY: Duration = Duration::from_secs(6);
/// Pause between health rounds while every server is down.
const HEALTH_INTERVAL_UNHEALTHY: Duration = Duration::from_secs(1);

/// Client settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Comma-separated `ip:port` list of UDP servers.
    pub udp_servers: String,
    /// Comma-separated `ip:port` list of TCP servers. Optional; only the
    /// listing operations need it.
    pub tcp_servers: String,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Key used to sign every outgoing frame.
    pub pre_shared_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp_servers: String::new(),
            tcp_servers: String::new(),
            timeout: Duration::from_secs(1),
            pre_shared_key: String::new(),
        }
    }
}

/// A dracula client. Cheap to share behind an [`Arc`]; every operation
/// takes `&self`.
pub struct Client {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    udp_pool: Arc<ServerPool>,
    tcp_pool: TcpPool,
    waiting: Arc<ResponseCache>,
    timed_out_rx: Mutex<Option<mpsc::UnboundedReceiver<ReplySender>>>,
    message_id: AtomicU32,
    pre_shared_key: Bytes,
    timeout: Duration,
    disposed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Build a client. At least one UDP or TCP server must be configured.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let udp_servers = parse_server_list(&config.udp_servers)?;
        let tcp_servers = parse_server_list(&config.tcp_servers)?;
        if udp_servers.is_empty() && tcp_servers.is_empty() {
            return Err(ClientError::NoServers);
        }

        let timeout = if config.timeout.is_zero() {
            Config::default().timeout
        } else {
            config.timeout
        };
        let (waiting, timed_out_rx) = ResponseCache::new(timeout);

        Ok(Self {
            socket: Mutex::new(None),
            udp_pool: Arc::new(ServerPool::new(udp_servers)),
            tcp_pool: TcpPool::new(tcp_servers),
            waiting,
            timed_out_rx: Mutex::new(Some(timed_out_rx)),
            message_id: AtomicU32::new(0),
            pre_shared_key: Bytes::from(config.pre_shared_key.into_bytes()),
            timeout,
            disposed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind the local UDP socket (`0` for an ephemeral port), start the
    /// receive and maintenance loops, and seed the server pool with one
    /// synchronous health round.
    pub async fn listen(self: &Arc<Self>, local_udp_port: u16) -> Result<(), ClientError> {
        if self.socket.lock().is_some() {
            return Err(ClientError::AlreadyListening);
        }
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", local_udp_port)).await?);
        debug!(local = %socket.local_addr()?, "client listening");
        *self.socket.lock() = Some(socket.clone());

        let mut tasks = Vec::new();

        let client = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            client.run_receive_loop(socket).await;
        }));

        if let Some(mut timed_out) = self.timed_out_rx.lock().take() {
            tasks.push(tokio::spawn(async move {
                while let Some(sender) = timed_out.recv().await {
                    let _ = sender.send(Err(ClientError::MessageTimedOut));
                }
            }));
        }
        tasks.push(self.waiting.spawn_cleanup());

        // first health pass runs inline so callers see a populated pool
        let (healthy, unhealthy) = self.healthcheck_round().await;
        self.udp_pool.set_health(healthy, unhealthy);

        let client = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            client.run_health_loop().await;
        }));

        self.tasks.lock().extend(tasks);
        Ok(())
    }

    /// Stop every background loop and drop the socket. Idempotent.
    pub fn close(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.waiting.dispose();
        self.udp_pool.dispose();
        self.tcp_pool.close_all();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.socket.lock() = None;
    }

    /// In-flight requests still waiting on a response.
    pub fn pending_requests(&self) -> usize {
        self.waiting.len()
    }

    pub fn list_healthy(&self) -> Vec<Endpoint> {
        self.udp_pool.list_healthy()
    }

    pub fn list_unhealthy(&self) -> Vec<Endpoint> {
        self.udp_pool.list_unhealthy()
    }

    // === Operations ===

    /// Record one occurrence of `value` in `namespace`.
    pub async fn put(&self, namespace: &str, value: &str) -> Result<(), ClientError> {
        self.request_udp(Command::Put, namespace, value)
            .await
            .map(drop)
    }

    /// Unexpired occurrences of `entry_key` in `namespace`. Counts above
    /// `u32::MAX` are clamped by the server.
    pub async fn count(&self, namespace: &str, entry_key: &str) -> Result<usize, ClientError> {
        decode_count(&self.request_udp(Command::Count, namespace, entry_key).await?)
    }

    /// Occurrences across every key in a namespace. Expensive server-side.
    pub async fn count_namespace(&self, namespace: &str) -> Result<usize, ClientError> {
        decode_count(
            &self
                .request_udp(Command::CountNamespace, namespace, "")
                .await?,
        )
    }

    /// Occurrences across the whole server. Very expensive server-side.
    pub async fn count_server(&self) -> Result<usize, ClientError> {
        decode_count(&self.request_udp(Command::CountServer, "", "").await?)
    }

    /// Probe one specific server with a COUNT against a synthetic
    /// namespace. Used by the health loop and available for diagnostics.
    /// Health means reachability: a server that answers within the timeout
    /// is healthy even when the answer is an error reply.
    pub async fn healthcheck(&self, server: Endpoint) -> Result<(), ClientError> {
        let namespace = format!("server_healthcheck_{server}");
        match self
            .request_udp_to(Command::Count, &namespace, "check", Some(server))
            .await
        {
            Ok(_) | Err(ClientError::Server(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Keys in `namespace` matching a `*` glob, over TCP.
    pub async fn key_match(
        &self,
        namespace: &str,
        pattern: &str,
    ) -> Result<Vec<String>, ClientError> {
        let data = self.request_tcp(Command::Keys, namespace, pattern).await?;
        Ok(split_lines(&data))
    }

    /// Every namespace on the server, over TCP.
    pub async fn list_namespaces(&self) -> Result<Vec<String>, ClientError> {
        let data = self.request_tcp(Command::ListNamespaces, "", "").await?;
        Ok(split_lines(&data))
    }

    // === UDP path ===

    async fn request_udp(
        &self,
        command: Command,
        namespace: &str,
        data: &str,
    ) -> Result<Bytes, ClientError> {
        self.request_udp_to(command, namespace, data, None).await
    }

    async fn request_udp_to(
        &self,
        command: Command,
        namespace: &str,
        data: &str,
        server: Option<Endpoint>,
    ) -> Result<Bytes, ClientError> {
        let socket = self.socket()?;
        let message_id = self.next_message_id();
        let packet = Packet::new(command, message_id, namespace, data, &self.pre_shared_key);
        let frame = packet.to_bytes()?;

        let (sender, receiver) = oneshot::channel();
        self.waiting.add(message_id, sender)?;

        let target = match server.or_else(|| self.udp_pool.choose()) {
            Some(target) => target,
            None => {
                let _ = self.waiting.pull(message_id);
                return Err(ClientError::NoHealthyUdpServers);
            }
        };
        // an out-of-range port is configurable but never routable; it fails
        // here the way an unreachable host fails at send
        let Some(target_addr) = target.socket_addr() else {
            let _ = self.waiting.pull(message_id);
            return Err(ClientError::PortOutOfRange(target.to_string()));
        };

        if let Err(e) = socket.send_to(&frame, target_addr).await {
            // immediate failure, clean up the pending entry here
            let _ = self.waiting.pull(message_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(result)) => result,
            // the cleanup sweep pulled the entry and dropped the sender
            Ok(Err(_)) => Err(ClientError::MessageTimedOut),
            Err(_) => {
                let _ = self.waiting.pull(message_id);
                Err(ClientError::MessageTimedOut)
            }
        }
    }

    async fn run_receive_loop(&self, socket: Arc<UdpSocket>) {
        loop {
            let mut buf = vec![0u8; PACKET_SIZE];
            let (len, remote) = match socket.recv_from(&mut buf).await {
                Ok(read) => read,
                Err(e) => {
                    if self.disposed.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("client read error: {e}");
                    continue;
                }
            };
            buf.truncate(len);

            let packet = match Packet::parse(&buf) {
                Ok(packet) => packet,
                Err(err) => {
                    let label = err.to_string();
                    match err.partial {
                        // still route it so the caller fails fast instead
                        // of timing out
                        Some(partial) if partial.message_id > 0 => {
                            debug!(%remote, error = %label, "parse error on addressed packet");
                            partial
                        }
                        _ => {
                            debug!(%remote, error = %label, "received invalid packet");
                            continue;
                        }
                    }
                }
            };

            let sender = match self.waiting.pull(packet.message_id) {
                Ok(sender) => sender,
                Err(e) => {
                    debug!(
                        %remote,
                        message_id = packet.message_id,
                        error = %e,
                        "response was not expected"
                    );
                    continue;
                }
            };

            match packet.command() {
                Some(Command::Error) => {
                    let _ = sender.send(Err(ClientError::Server(packet.data_value_str())));
                }
                Some(
                    Command::Count
                    | Command::Put
                    | Command::CountNamespace
                    | Command::CountServer,
                ) => {
                    let _ = sender.send(Ok(Bytes::copy_from_slice(packet.data_value())));
                }
                _ => {
                    let command_char = packet.command_byte() as char;
                    debug!(%remote, command = %command_char, "unhandled response command");
                    // dropping the sender fails the caller immediately
                }
            }
        }
    }

    // === TCP path ===

    async fn request_tcp(
        &self,
        command: Command,
        namespace: &str,
        data: &str,
    ) -> Result<String, ClientError> {
        let message_id = self.next_message_id();
        let packet = Packet::new(command, message_id, namespace, data, &self.pre_shared_key);
        let mut out = BytesMut::with_capacity(PACKET_SIZE + STOP_SYMBOL.len());
        FrameCodec.encode(&packet, &mut out)?;

        let mut conn = self.tcp_pool.acquire().await?;
        if let Err(e) = conn.write_all(&out).await {
            debug!("client tcp write failed: {e}");
            return Err(e.into());
        }

        let frame = match tokio::time::timeout(TCP_READ_TIMEOUT, read_one_frame(&mut conn)).await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(e), // connection is dropped, not pooled
            Err(_) => {
                debug!(message_id, "tcp read timed out");
                return Err(ClientError::MessageTimedOut);
            }
        };

        // replies on an exclusive socket need no message-id correlation
        let reply = Packet::parse(&frame).map_err(|e| ClientError::Protocol(e.kind))?;
        self.tcp_pool.release(conn);

        if reply.command() == Some(Command::Error) {
            return Err(ClientError::Server(reply.data_value_str()));
        }
        Ok(reply.data_value_str())
    }

    // === Health ===

    async fn run_health_loop(&self) {
        loop {
            if self.disposed.load(Ordering::SeqCst) || self.udp_pool.is_disposed() {
                break;
            }
            let (healthy, unhealthy) = self.healthcheck_round().await;
            let any_healthy = !healthy.is_empty();
            self.udp_pool.set_health(healthy, unhealthy);

            let pause = if any_healthy {
                HEALTH_INTERVAL_HEALTHY
            } else {
                HEALTH_INTERVAL_UNHEALTHY
            };
            tokio::time::sleep(pause).await;
        }
    }

    async fn healthcheck_round(&self) -> (Vec<Endpoint>, Vec<Endpoint>) {
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for &server in self.udp_pool.servers() {
            match self.healthcheck(server).await {
                Ok(()) => healthy.push(server),
                Err(e) => {
                    debug!(%server, error = %e, "server unhealthy");
                    unhealthy.push(server);
                }
            }
        }
        (healthy, unhealthy)
    }

    fn next_message_id(&self) -> u32 {
        // the counter wraps at u32::MAX; the waiting cache TTL is far
        // shorter than the time needed to wrap, so collisions are moot
        self.message_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, ClientError> {
        self.socket
            .lock()
            .clone()
            .ok_or(ClientError::NotListening)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_one_frame(conn: &mut TcpStream) -> Result<Bytes, ClientError> {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::with_capacity(PACKET_SIZE + STOP_SYMBOL.len());
    loop {
        if let Some(frame) = codec.decode(&mut buf)? {
            return Ok(frame);
        }
        let read = conn.read_buf(&mut buf).await?;
        if read == 0 {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            )));
        }
    }
}

fn decode_count(data: &Bytes) -> Result<usize, ClientError> {
    if data.len() < 4 {
        return Err(ClientError::CountReturnBytesTooShort);
    }
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap_or_default());
    Ok(count as usize)
}

fn split_lines(data: &str) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_server_list(list: &str) -> Result<Vec<Endpoint>, ClientError> {
    let mut servers = Vec::new();
    for part in list.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let endpoint: Endpoint = part
            .parse()
            .map_err(|_| ClientError::BadServerAddress(part.to_string()))?;
        servers.push(endpoint);
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        Client::new(Config {
            udp_servers: "127.0.0.1:3509".into(),
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_server_list() {
        let servers = parse_server_list("127.0.0.1:9000, 127.0.0.1:9100").unwrap();
        assert_eq!(servers.len(), 2);
        assert!(parse_server_list("").unwrap().is_empty());
        assert!(matches!(
            parse_server_list("not-an-addr"),
            Err(ClientError::BadServerAddress(_))
        ));
        assert!(matches!(
            parse_server_list("127.0.0.1"),
            Err(ClientError::BadServerAddress(_))
        ));
    }

    #[test]
    fn test_parse_server_list_keeps_out_of_range_ports() {
        // such an endpoint is configured, never routable; it belongs in
        // the unhealthy list, not in a construction error
        let servers = parse_server_list("127.0.0.1:9000,127.0.0.1:99999").unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].socket_addr().is_some());
        assert!(servers[1].socket_addr().is_none());
    }

    #[test]
    fn test_new_requires_some_server() {
        assert!(matches!(
            Client::new(Config::default()),
            Err(ClientError::NoServers)
        ));
        // tcp-only is a valid configuration
        assert!(Client::new(Config {
            tcp_servers: "127.0.0.1:3509".into(),
            ..Config::default()
        })
        .is_ok());
    }

    #[test]
    fn test_message_id_wraps() {
        let client = test_client();
        client.message_id.store(u32::MAX - 2, Ordering::Relaxed);
        assert_eq!(client.next_message_id(), u32::MAX - 1);
        assert_eq!(client.next_message_id(), u32::MAX);
        assert_eq!(client.next_message_id(), 0);
        assert_eq!(client.next_message_id(), 1);
    }

    #[test]
    fn test_message_id_concurrent_allocations() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 1000;
        let client = std::sync::Arc::new(test_client());

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                let client = client.clone();
                scope.spawn(move || {
                    for _ in 0..PER_THREAD {
                        client.next_message_id();
                    }
                });
            }
        });

        assert_eq!(client.next_message_id(), THREADS * PER_THREAD + 1);
    }

    #[test]
    fn test_decode_count() {
        assert_eq!(decode_count(&Bytes::from_static(&[5, 0, 0, 0])).unwrap(), 5);
        let padded = Bytes::from(vec![1, 1, 0, 0, b' ', b' ']);
        assert_eq!(decode_count(&padded).unwrap(), 257);
        assert!(matches!(
            decode_count(&Bytes::from_static(&[1, 2])),
            Err(ClientError::CountReturnBytesTooShort)
        ));
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\nb\nc"), vec!["a", "b", "c"]);
        assert!(split_lines("").is_empty());
        assert!(split_lines("   ").is_empty());
        assert_eq!(split_lines("one\n\n"), vec!["one"]);
    }

    #[tokio::test]
    async fn test_ops_before_listen_fail_cleanly() {
        let client = test_client();
        assert!(matches!(
            client.put("ns", "k").await,
            Err(ClientError::NotListening)
        ));
    }
}
