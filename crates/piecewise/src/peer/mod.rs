//! A remote peer in the network that shares the same torrent.
pub mod connection;
pub mod worker;

use std::{fmt::Display, net::SocketAddr};

use rand::{distributions::Alphanumeric, Rng};
use speedy::{Readable, Writable};

pub use connection::Connection;
pub use worker::{ConnectionState, Phase, Worker};

/// Client identifier and version of the local peer id.
pub const PEER_ID_PREFIX: &[u8; 8] = b"-PW0001-";

/// 20 bytes that identify a peer. Generated once per run for the local
/// client, informational only for remote peers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// `-PW0001-` followed by 12 random alphanumeric characters.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);

        let mut rng = rand::thread_rng();
        for b in id[8..].iter_mut() {
            *b = rng.sample(Alphanumeric);
        }

        PeerId(id)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let buff: [u8; 20] = value
            .try_into()
            .map_err(|_| "The PeerId must have exactly 20 bytes")?;
        Ok(PeerId(buff))
    }
}

/// Remote endpoint of a peer, as given by the tracker or the command line.
/// The host may be a name, it is resolved when connecting.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(value: SocketAddr) -> Self {
        Self { host: value.ip().to_string(), port: value.port() }
    }
}

impl std::str::FromStr for PeerAddress {
    type Err = String;

    /// Parse `host:port`, or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("`{s}` is not in the form host:port"))?;
        let port: u16 =
            port.parse().map_err(|_| format!("invalid port in `{s}`"))?;

        if host.is_empty() || host.contains(':') {
            return Err(format!("invalid host in `{s}`"));
        }

        Ok(PeerAddress::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_peer_id() {
        let id = PeerId::generate();
        assert_eq!(&id.0[..8], PEER_ID_PREFIX);
        assert!(id.0[8..].iter().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(id, PeerId::generate());
    }

    #[test]
    fn parse_peer_address() {
        let addr: PeerAddress = "127.0.0.1:6881".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("127.0.0.1", 6881));

        let addr: PeerAddress = "[::1]:51413".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("::1", 51413));
        assert_eq!(addr.to_string(), "[::1]:51413");

        let addr: PeerAddress = "example.com:80".parse().unwrap();
        assert_eq!(addr.to_string(), "example.com:80");

        assert!("example.com".parse::<PeerAddress>().is_err());
        assert!("example.com:99999".parse::<PeerAddress>().is_err());
        assert!(":80".parse::<PeerAddress>().is_err());
    }
}
