//! One transport stream to one remote peer.
//!
//! A [`Connection`] starts framed with the [`HandshakeCodec`], and after a
//! successful handshake it switches to the [`MessageCodec`], keeping the read
//! and write buffers. Bytes that the peer sent right after its handshake are
//! not lost.
use std::{io, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, warn};

use crate::{
    error::Error,
    metainfo::InfoHash,
    peer::{PeerAddress, PeerId},
    tcp_wire::{Handshake, HandshakeCodec, Message, MessageCodec},
};

/// How long [`Connection::close`] waits to flush pending frames.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

enum Stage<T> {
    Handshaking(Framed<T, HandshakeCodec>),
    Ready(Framed<T, MessageCodec>),
    Closed,
}

pub struct Connection<T = TcpStream> {
    remote: PeerAddress,
    remote_peer_id: Option<PeerId>,
    stage: Stage<T>,
}

impl Connection<TcpStream> {
    /// Connect to `remote`, failing with [`Error::PeerConnect`] if the peer
    /// is unreachable, refuses the connection or takes longer than
    /// `connect_timeout`.
    pub async fn open(
        remote: &PeerAddress,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let connect = TcpStream::connect((remote.host.as_str(), remote.port));

        let socket = match timeout(connect_timeout, connect).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => return Err(Error::peer_connect(remote, e)),
            Err(_) => {
                let e = io::Error::new(io::ErrorKind::TimedOut, "timed out");
                return Err(Error::peer_connect(remote, e));
            }
        };

        debug!("connected to {remote}");

        Ok(Self::from_stream(remote.clone(), socket))
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already established stream.
    pub fn from_stream(remote: PeerAddress, io: T) -> Self {
        Self {
            remote,
            remote_peer_id: None,
            stage: Stage::Handshaking(Framed::new(io, HandshakeCodec)),
        }
    }

    pub fn remote(&self) -> &PeerAddress {
        &self.remote
    }

    /// Peer id the remote sent in its handshake.
    pub fn remote_peer_id(&self) -> Option<PeerId> {
        self.remote_peer_id
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.stage, Stage::Closed)
    }

    /// Send our handshake and validate theirs. On success the connection is
    /// ready to exchange messages. On failure the transport is dropped.
    pub async fn handshake(
        &mut self,
        info_hash: InfoHash,
        peer_id: PeerId,
    ) -> Result<Handshake, Error> {
        let mut socket =
            match std::mem::replace(&mut self.stage, Stage::Closed) {
                Stage::Handshaking(socket) => socket,
                Stage::Ready(socket) => {
                    warn!("{} already handshaked", self.remote);
                    self.stage = Stage::Ready(socket);
                    return Err(Error::HandshakeInvalid);
                }
                Stage::Closed => return Err(Error::PeerClosedSocket),
            };

        let ours = Handshake::new(info_hash, peer_id);

        debug!("> handshake");
        socket.send(ours.clone()).await?;

        let theirs = match socket.next().await {
            Some(theirs) => theirs?,
            None => {
                warn!("{} did not send a handshake", self.remote);
                return Err(Error::PeerClosedSocket);
            }
        };
        debug!("< handshake {:?}", theirs.peer_id);

        ours.validate(&theirs)?;

        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, MessageCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;

        self.remote_peer_id = Some(theirs.peer_id);
        self.stage = Stage::Ready(Framed::from_parts(new_parts));

        Ok(theirs)
    }

    /// Wait for the next complete message. Fails with
    /// [`Error::PeerClosedSocket`] if the peer closed the connection between
    /// frames, and with an IO error if it closed in the middle of one.
    pub async fn receive(&mut self) -> Result<Message, Error> {
        let Stage::Ready(socket) = &mut self.stage else {
            return Err(self.not_ready());
        };

        match socket.next().await {
            Some(msg) => msg,
            None => Err(Error::PeerClosedSocket),
        }
    }

    /// Write and flush a complete frame.
    pub async fn send(&mut self, msg: Message) -> Result<(), Error> {
        let Stage::Ready(socket) = &mut self.stage else {
            return Err(self.not_ready());
        };

        socket.send(msg).await
    }

    /// Flush what is pending and release the transport. Calling it more than
    /// once is a no-op.
    pub async fn close(&mut self) {
        let closing = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Handshaking(mut socket) => {
                timeout(CLOSE_TIMEOUT, socket.close()).await.map(|_| ())
            }
            Stage::Ready(mut socket) => {
                timeout(CLOSE_TIMEOUT, socket.close()).await.map(|_| ())
            }
            Stage::Closed => return,
        };

        if closing.is_err() {
            debug!("{} took too long to close", self.remote);
        }
        debug!("closed connection with {}", self.remote);
    }

    fn not_ready(&self) -> Error {
        match self.stage {
            Stage::Closed => Error::PeerClosedSocket,
            _ => Error::NotHandshaked,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::tcp_wire::BlockInfo;

    const INFO_HASH: InfoHash = InfoHash([3u8; 20]);

    fn pair() -> (Connection<DuplexStream>, DuplexStream) {
        let (ours, theirs) = duplex(1 << 16);
        (Connection::from_stream(PeerAddress::new("duplex", 0), ours), theirs)
    }

    /// Answer the handshake as a remote peer, returning the stream already
    /// switched to the message codec.
    async fn remote_handshake(
        theirs: DuplexStream,
        info_hash: InfoHash,
    ) -> Framed<DuplexStream, MessageCodec> {
        let mut socket = Framed::new(theirs, HandshakeCodec);
        let ours = socket.next().await.unwrap().unwrap();
        assert_eq!(ours.info_hash, INFO_HASH);

        socket
            .send(Handshake::new(info_hash, PeerId([9u8; 20])))
            .await
            .unwrap();

        let parts = socket.into_parts();
        let mut new_parts = FramedParts::new(parts.io, MessageCodec);
        new_parts.read_buf = parts.read_buf;
        new_parts.write_buf = parts.write_buf;
        Framed::from_parts(new_parts)
    }

    #[tokio::test]
    async fn handshake_then_messages() {
        let (mut conn, theirs) = pair();

        let remote = tokio::spawn(async move {
            let mut socket = remote_handshake(theirs, INFO_HASH).await;
            socket.send(Message::Unchoke).await.unwrap();
            let msg = socket.next().await.unwrap().unwrap();
            assert_eq!(msg, Message::Request(BlockInfo::new(0, 0, 4)));
        });

        assert!(matches!(conn.receive().await, Err(Error::NotHandshaked)));

        let theirs =
            conn.handshake(INFO_HASH, PeerId::generate()).await.unwrap();
        assert_eq!(theirs.peer_id, PeerId([9u8; 20]));
        assert_eq!(conn.remote_peer_id(), Some(PeerId([9u8; 20])));

        assert_eq!(conn.receive().await.unwrap(), Message::Unchoke);
        conn.send(Message::Request(BlockInfo::new(0, 0, 4))).await.unwrap();

        remote.await.unwrap();
        assert!(matches!(conn.receive().await, Err(Error::PeerClosedSocket)));

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn handshake_with_other_info_hash() {
        let (mut conn, theirs) = pair();

        tokio::spawn(async move {
            let _socket = remote_handshake(theirs, InfoHash([4u8; 20])).await;
        });

        let r = conn.handshake(INFO_HASH, PeerId::generate()).await;
        assert!(matches!(r, Err(Error::InfoHashMismatch)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn eof_in_the_middle_of_a_frame() {
        let (mut conn, theirs) = pair();

        tokio::spawn(async move {
            let socket = remote_handshake(theirs, INFO_HASH).await;
            let mut io = socket.into_inner();
            // a piece frame announcing 13 bytes, only 5 are sent
            io.write_all(&[0, 0, 0, 13, 7, 0, 0, 0, 0]).await.unwrap();
            io.shutdown().await.unwrap();
        });

        conn.handshake(INFO_HASH, PeerId::generate()).await.unwrap();
        assert!(matches!(conn.receive().await, Err(Error::IO(_))));
    }
}
