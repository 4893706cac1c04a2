//! HTTP announce request and response.
use std::net::{Ipv4Addr, SocketAddrV4};

use bendy::decoding::{self, FromBencode, Object, ResultExt};
use hashbrown::HashSet;

use crate::{
    error::Error,
    metainfo::InfoHash,
    peer::{PeerAddress, PeerId},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// Port where this client would accept connections.
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl Request {
    /// Request of a client that starts downloading a file of `length` bytes.
    pub fn started(
        info_hash: InfoHash,
        peer_id: PeerId,
        port: u16,
        length: u64,
    ) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left: length,
        }
    }

    /// `announce` with the query string of this request appended. The info
    /// hash and peer id are raw bytes, percent-encoded. Only one announce is
    /// made per download, so the event is always `started`.
    pub fn url(&self, announce: &str) -> Result<String, Error> {
        if self.port == 0 {
            return Err(Error::TrackerInvalidParam("port"));
        }

        let separator = if announce.contains('?') { '&' } else { '?' };

        let url = format!(
            "{announce}{separator}info_hash={}&peer_id={}&port={}&uploaded={}\
             &downloaded={}&left={}&compact=1&event=started",
            urlencoding::encode_binary(&self.info_hash.0),
            urlencoding::encode_binary(&self.peer_id.0),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );

        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Seconds the tracker wants between announces.
    pub interval: u64,
    /// Peers without duplicates, in the order of the tracker.
    pub peers: Vec<PeerAddress>,
    pub warning: Option<String>,
}

impl Response {
    /// Decode the bencoded body of an announce response.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let raw = RawResponse::from_bencode(bytes)?;

        if let Some(reason) = raw.failure_reason {
            return Err(Error::TrackerFailure(reason));
        }

        let interval = raw.interval.ok_or(Error::TrackerResponse("interval"))?;

        let peers = match raw.peers.ok_or(Error::TrackerResponse("peers"))? {
            RawPeers::Compact(buf) => parse_compact_peer_list(&buf)?,
            RawPeers::Dicts(peers) => peers
                .into_iter()
                .map(|p| PeerAddress::new(p.ip, p.port))
                .collect(),
        };

        let mut seen = HashSet::new();
        let peers =
            peers.into_iter().filter(|p| seen.insert(p.clone())).collect();

        Ok(Self { interval, peers, warning: raw.warning })
    }
}

/// Peers in 6 byte chunks, 4 for the ipv4 and 2 for the port.
pub fn parse_compact_peer_list(buf: &[u8]) -> Result<Vec<PeerAddress>, Error> {
    let chunks = buf.chunks_exact(6);
    if !chunks.remainder().is_empty() {
        return Err(Error::TrackerCompactPeerList);
    }

    Ok(chunks
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let port = u16::from_be_bytes([c[4], c[5]]);
            PeerAddress::from(std::net::SocketAddr::V4(SocketAddrV4::new(
                ip, port,
            )))
        })
        .collect())
}

struct RawResponse {
    failure_reason: Option<String>,
    warning: Option<String>,
    interval: Option<u64>,
    peers: Option<RawPeers>,
}

enum RawPeers {
    Compact(Vec<u8>),
    Dicts(Vec<DictPeer>),
}

/// Non compact form of a peer.
struct DictPeer {
    ip: String,
    port: u16,
}

impl FromBencode for RawResponse {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut failure_reason = None;
        let mut warning = None;
        let mut interval = None;
        let mut peers = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"failure reason", value) => {
                    failure_reason = String::decode_bencode_object(value)
                        .context("failure reason")
                        .map(Some)?;
                }
                (b"warning message", value) => {
                    warning = String::decode_bencode_object(value)
                        .context("warning message")
                        .map(Some)?;
                }
                (b"interval", value) => {
                    interval = u64::decode_bencode_object(value)
                        .context("interval")
                        .map(Some)?;
                }
                (b"peers", Object::Bytes(buf)) => {
                    peers = Some(RawPeers::Compact(buf.to_vec()));
                }
                (b"peers", value) => {
                    peers = Vec::<DictPeer>::decode_bencode_object(value)
                        .context("peers")
                        .map(|p| Some(RawPeers::Dicts(p)))?;
                }
                _ => {}
            }
        }

        Ok(Self { failure_reason, warning, interval, peers })
    }
}

impl FromBencode for DictPeer {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut ip = None;
        let mut port = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"ip", value) => {
                    ip = String::decode_bencode_object(value)
                        .context("ip")
                        .map(Some)?;
                }
                (b"port", value) => {
                    port = u16::decode_bencode_object(value)
                        .context("port")
                        .map(Some)?;
                }
                _ => {}
            }
        }

        let ip = ip.ok_or_else(|| decoding::Error::missing_field("ip"))?;
        let port = port.ok_or_else(|| decoding::Error::missing_field("port"))?;

        Ok(Self { ip, port })
    }
}
