//! Server configuration

use dracula_common::Endpoint;

use crate::error::ServerError;

/// Default port for both UDP and TCP listeners.
pub const DEFAULT_PORT: u16 = 3509;

/// Default occurrence lifetime.
pub const DEFAULT_EXPIRE_AFTER_SECS: i64 = 60;

/// Expiry shorter than this is unreliable and rejected at startup.
pub const MINIMUM_EXPIRY_SECS: i64 = 2;

/// Default denominator for the partial cleanup sweep: one third of the
/// namespaces per pass.
pub const DEFAULT_CLEANUP_DENOMINATOR: usize = 3;

/// Settings for one server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Seconds each PUT occurrence lives.
    pub expire_after_secs: i64,

    /// Key used to authenticate every frame. Empty disables nothing; an
    /// empty key is still hashed, it just offers no protection.
    pub pre_shared_key: String,

    /// Sibling servers receiving best-effort replicated PUTs.
    pub peers: Vec<Endpoint>,

    /// Fraction denominator of namespaces swept per cleanup pass.
    pub cleanup_denominator: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            expire_after_secs: DEFAULT_EXPIRE_AFTER_SECS,
            pre_shared_key: String::new(),
            peers: Vec::new(),
            cleanup_denominator: DEFAULT_CLEANUP_DENOMINATOR,
        }
    }
}

impl ServerConfig {
    pub fn new(expire_after_secs: i64, pre_shared_key: impl Into<String>) -> Self {
        Self {
            expire_after_secs,
            pre_shared_key: pre_shared_key.into(),
            ..Self::default()
        }
    }

    /// Parse and attach a comma-separated `ip:port` peer list, skipping the
    /// server's own endpoint so it never replicates to itself.
    pub fn with_peer_list(
        mut self,
        self_endpoint: &str,
        peer_list: &str,
    ) -> Result<Self, ServerError> {
        self.peers = parse_peer_list(self_endpoint, peer_list)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.expire_after_secs < MINIMUM_EXPIRY_SECS {
            return Err(ServerError::ExpiryTooSmall);
        }
        Ok(())
    }
}

/// Parse a comma-separated peer list, dropping entries equal to
/// `self_endpoint`. A peer with a numeric but out-of-range port is kept;
/// replication to it fails at send time like any other unreachable peer.
pub fn parse_peer_list(
    self_endpoint: &str,
    peer_list: &str,
) -> Result<Vec<Endpoint>, ServerError> {
    let mut peers = Vec::new();
    for part in peer_list.split(',').map(str::trim) {
        if part.is_empty() || part == self_endpoint {
            continue;
        }
        let peer: Endpoint = part
            .parse()
            .map_err(|_| ServerError::BadPeerFormat(part.to_string()))?;
        peers.push(peer);
    }
    Ok(peers)
}
