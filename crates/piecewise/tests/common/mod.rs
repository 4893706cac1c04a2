#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{Future, SinkExt, StreamExt};
use piecewise::{
    bitfield::Bitfield,
    disk::OutputSink,
    error::Error,
    metainfo::InfoHash,
    peer::{worker::Timeouts, PeerAddress, PeerId},
    piece::{sha1, PieceDescriptor},
    tcp_wire::{
        Block, BlockInfo, Handshake, HandshakeCodec, Message, MessageCodec,
    },
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::codec::{Framed, FramedParts};

pub const INFO_HASH: InfoHash = InfoHash([7u8; 20]);

pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .compact()
        .without_time()
        .try_init();
}

/// Short timeouts, so failing peers are dropped quickly.
pub fn timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_secs(2),
        handshake: Duration::from_secs(2),
        message: Duration::from_secs(2),
    }
}

/// Descriptors of `data` cut in pieces of `piece_length`.
pub fn descriptors(data: &[u8], piece_length: usize) -> Vec<PieceDescriptor> {
    data.chunks(piece_length)
        .enumerate()
        .map(|(i, chunk)| {
            PieceDescriptor::new(i as u32, sha1(chunk), chunk.len() as u32)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct Recording {
    pub writes: Vec<(u64, Vec<u8>)>,
    pub flushed: bool,
}

/// Sink that keeps every write in memory. Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Recording>>);

impl RecordingSink {
    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.0.lock().unwrap().writes.clone()
    }

    pub fn flushed(&self) -> bool {
        self.0.lock().unwrap().flushed
    }

    /// The file as it would be on disk.
    pub fn contents(&self, len: usize) -> Vec<u8> {
        let mut file = vec![0u8; len];
        for (offset, data) in self.writes() {
            let offset = offset as usize;
            file[offset..offset + data.len()].copy_from_slice(&data);
        }
        file
    }
}

impl OutputSink for RecordingSink {
    async fn write_at(
        &mut self,
        offset: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        self.0.lock().unwrap().writes.push((offset, data.to_vec()));
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.0.lock().unwrap().flushed = true;
        Ok(())
    }
}

/// The remote side of a connection, after the handshake.
pub struct Remote {
    socket: Framed<tokio::net::TcpStream, MessageCodec>,
}

impl Remote {
    pub async fn send(&mut self, msg: Message) {
        // the worker may already be gone
        let _ = self.socket.send(msg).await;
    }

    /// Next message, or `None` once the worker closed the connection.
    pub async fn recv(&mut self) -> Option<Message> {
        self.socket.next().await.and_then(Result::ok)
    }

    /// Next request, skipping interested and keep-alive messages.
    pub async fn next_request(&mut self) -> Option<BlockInfo> {
        loop {
            match self.recv().await? {
                Message::Request(info) => return Some(info),
                _ => continue,
            }
        }
    }

    /// Announce every one of `pieces` and unchoke.
    pub async fn have_all(&mut self, pieces: usize) {
        let bitfield = Bitfield::from_vec(vec![0xFF; pieces.div_ceil(8)]);
        self.send(Message::Bitfield(bitfield)).await;
        self.send(Message::Unchoke).await;
    }

    pub async fn send_piece(&mut self, index: u32, data: &[u8]) {
        let block = Block { index, begin: 0, block: data.to_vec() };
        self.send(Message::Piece(block)).await;
    }

    /// Answer every request with the right slice of `data` until the worker
    /// leaves. Returns the requests that were answered.
    pub async fn serve(
        &mut self,
        data: &[u8],
        piece_length: usize,
    ) -> Vec<BlockInfo> {
        let mut served = Vec::new();

        while let Some(info) = self.next_request().await {
            let start = info.index as usize * piece_length;
            let end = (start + info.len as usize).min(data.len());
            self.send_piece(info.index, &data[start..end]).await;
            served.push(info);
        }

        served
    }
}

/// Listen on a random local port, accept one connection, complete the
/// handshake and hand the connection to `script`.
pub async fn mock_peer<F, Fut, R>(script: F) -> (PeerAddress, JoinHandle<R>)
where
    F: FnOnce(Remote) -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send,
    R: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();

        let mut socket = Framed::new(socket, HandshakeCodec);
        let hs = socket.next().await.unwrap().unwrap();
        socket
            .send(Handshake::new(hs.info_hash, PeerId([2u8; 20])))
            .await
            .unwrap();

        let parts = socket.into_parts();
        let mut new_parts = FramedParts::new(parts.io, MessageCodec);
        new_parts.read_buf = parts.read_buf;
        new_parts.write_buf = parts.write_buf;

        script(Remote { socket: Framed::from_parts(new_parts) }).await
    });

    (addr.into(), handle)
}

/// A peer that seeds all of `data`.
pub async fn seeder(
    data: &'static [u8],
    piece_length: usize,
) -> (PeerAddress, JoinHandle<Vec<BlockInfo>>) {
    mock_peer(move |mut remote| async move {
        remote.have_all(data.len().div_ceil(piece_length)).await;
        remote.serve(data, piece_length).await
    })
    .await
}

/// An address where nothing listens.
pub async fn unreachable_peer() -> PeerAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.into()
}
