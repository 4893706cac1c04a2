//! Codec for encoding and decoding handshakes.
//!
//! The handshake has a different structure than the rest of the messages and
//! is only exchanged once, at the beginning of a connection. After it, the
//! connection switches to [`super::MessageCodec`] keeping the read and write
//! buffers of the framed transport.

use bytes::BytesMut;
use speedy::{BigEndian, Readable, Writable};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::PSTR;
use crate::{error::Error, metainfo::InfoHash, peer::PeerId};

/// Size of a handshake on the wire.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

#[derive(Debug, Clone, Default)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        buf.extend_from_slice(&handshake.serialize()?);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    /// Waits for exactly [`HANDSHAKE_LEN`] bytes. Any byte after that belongs
    /// to the message stream and stays in the buffer.
    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Handshake>, Self::Error> {
        if buf.len() < HANDSHAKE_LEN {
            buf.reserve(HANDSHAKE_LEN - buf.len());
            return Ok(None);
        }

        let bytes = buf.split_to(HANDSHAKE_LEN);
        Handshake::deserialize(&bytes).map(Some)
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// or the info hash differs from ours, the connection is severed. The
/// reserved field is 8 zero bytes, no extension is advertised.
#[derive(Clone, Debug, PartialEq, Writable, Readable)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            pstr_len: PSTR.len() as u8,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    fn serialize(&self) -> Result<[u8; HANDSHAKE_LEN], Error> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        let temp = self.write_to_vec_with_ctx(BigEndian {})?;
        buf.copy_from_slice(&temp[..]);
        Ok(buf)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        Ok(Self::read_from_buffer_with_ctx(BigEndian {}, buf)?)
    }

    /// Validate the handshake received from a peer against ours.
    /// The remote peer id is informational and never checked.
    pub fn validate(&self, theirs: &Self) -> Result<(), Error> {
        if theirs.pstr_len as usize != PSTR.len() || theirs.pstr != PSTR {
            warn!("! handshake with wrong pstr, dropping connection");
            return Err(Error::HandshakeInvalid);
        }
        if self.info_hash != theirs.info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return Err(Error::InfoHashMismatch);
        }
        Ok(())
    }
}
