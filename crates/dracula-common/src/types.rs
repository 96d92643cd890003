//! Shared type definitions
//!
//! Server endpoints are configured as `ip:port` strings. The port is kept
//! exactly as written, even when it falls outside the routable range: an
//! endpoint like `127.0.0.1:99999` can never answer, so it belongs in a
//! health check's unhealthy list, not in a configuration error.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// One configured server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: IpAddr,
    port: u32,
}

impl Endpoint {
    pub fn new(host: IpAddr, port: u32) -> Self {
        Self { host, port }
    }

    /// The routable address, when the port fits the range the OS accepts.
    /// `None` means any send or dial to this endpoint is doomed; callers
    /// surface that the same way they surface an unreachable host.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        u16::try_from(self.port)
            .ok()
            .map(|port| SocketAddr::new(self.host, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip(),
            port: addr.port() as u32,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(format!("expected ip:port, got {s:?}"));
        }
        let host: IpAddr = parts[0]
            .parse()
            .map_err(|_| format!("bad ip address in {s:?}"))?;
        let port: u32 = parts[1]
            .parse()
            .map_err(|_| format!("bad port in {s:?}"))?;
        Ok(Self { host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_roundtrip() {
        let endpoint: Endpoint = "127.0.0.1:3509".parse().unwrap();
        assert_eq!(endpoint.to_string(), "127.0.0.1:3509");
        assert_eq!(
            endpoint.socket_addr(),
            Some("127.0.0.1:3509".parse().unwrap())
        );
    }

    #[test]
    fn test_out_of_range_port_parses_but_is_unroutable() {
        let endpoint: Endpoint = "127.0.0.1:99999".parse().unwrap();
        assert_eq!(endpoint.to_string(), "127.0.0.1:99999");
        assert_eq!(endpoint.socket_addr(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("127.0.0.1".parse::<Endpoint>().is_err());
        assert!("127.0.0.1:abc".parse::<Endpoint>().is_err());
        assert!("127.0.0.1:-1".parse::<Endpoint>().is_err());
        assert!("localhost:80".parse::<Endpoint>().is_err());
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: SocketAddr = "10.0.0.9:3509".parse().unwrap();
        let endpoint = Endpoint::from(addr);
        assert_eq!(endpoint.to_string(), "10.0.0.9:3509");
        assert_eq!(endpoint.socket_addr(), Some(addr));
    }
}
