//! Dial-on-demand TCP connection cache
//!
//! TCP requests are rare next to the UDP firehose, so the pool is simple:
//! reuse an idle connection when one exists, otherwise dial a random
//! configured endpoint. Connections are returned only after a clean
//! request/response cycle; anything suspect is dropped instead.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpStream;
use tracing::debug;

use dracula_common::Endpoint;

use crate::error::ClientError;

/// Idle connections kept per client.
const MAX_IDLE: usize = 4;
/// Dial attempts before giving up on a request.
const MAX_DIAL_TRIES: usize = 5;

pub(crate) struct TcpPool {
    servers: Vec<Endpoint>,
    idle: Mutex<VecDeque<TcpStream>>,
}

impl TcpPool {
    pub fn new(servers: Vec<Endpoint>) -> Self {
        Self {
            servers,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    /// An idle connection, or a fresh dial to a random endpoint.
    pub async fn acquire(&self) -> Result<TcpStream, ClientError> {
        if let Some(conn) = self.idle.lock().pop_front() {
            return Ok(conn);
        }
        if self.servers.is_empty() {
            return Err(ClientError::NoHealthyTcpServers);
        }

        for _ in 0..MAX_DIAL_TRIES {
            let target = self.servers[rand::thread_rng().gen_range(0..self.servers.len())];
            let Some(addr) = target.socket_addr() else {
                debug!(%target, "tcp endpoint has no routable address");
                continue;
            };
            match TcpStream::connect(addr).await {
                Ok(conn) => return Ok(conn),
                Err(e) => debug!(%target, error = %e, "tcp dial failed"),
            }
        }
        Err(ClientError::NoHealthyTcpServers)
    }

    /// Return a connection that finished a clean exchange.
    pub fn release(&self, conn: TcpStream) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push_back(conn);
        }
    }

    /// Drop every idle connection.
    pub fn close_all(&self) {
        self.idle.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_acquire_without_servers() {
        let pool = TcpPool::new(vec![]);
        assert!(matches!(
            pool.acquire().await,
            Err(ClientError::NoHealthyTcpServers)
        ));
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let pool = TcpPool::new(vec![addr.into()]);
        let conn = pool.acquire().await.unwrap();
        let local = conn.local_addr().unwrap();
        pool.release(conn);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.local_addr().unwrap(), local);
    }

    #[tokio::test]
    async fn test_acquire_all_dials_fail() {
        // bind then drop to get a port that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let pool = TcpPool::new(vec![dead.into()]);
        assert!(matches!(
            pool.acquire().await,
            Err(ClientError::NoHealthyTcpServers)
        ));
    }

    #[tokio::test]
    async fn test_acquire_unroutable_endpoint_fails() {
        let pool = TcpPool::new(vec!["127.0.0.1:99999".parse().unwrap()]);
        assert!(matches!(
            pool.acquire().await,
            Err(ClientError::NoHealthyTcpServers)
        ));
    }
}
