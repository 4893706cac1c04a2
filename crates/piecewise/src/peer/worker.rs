//! The control loop bound to one peer connection.
//!
//! A worker negotiates with its peer, claims one piece at a time from the
//! [`WorkQueue`], requests it as a single block, verifies it and forwards it
//! to the coordinator. Every piece that the worker claimed and could not
//! deliver goes back to the queue, whatever the reason the worker stops.
use std::{sync::Arc, time::Duration};

use hashbrown::HashMap;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::{mpsc, watch},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, BitfieldExt},
    config::Config,
    error::Error,
    metainfo::InfoHash,
    peer::{Connection, PeerAddress, PeerId},
    piece::{PieceDescriptor, VerifiedPiece},
    queue::WorkQueue,
    tcp_wire::{BlockInfo, Message},
};

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Handshaked and interested, waiting for a bitfield or a have.
    AwaitingAvailability,
    /// Knows what the peer has, free to request when unchoked.
    Negotiating,
    /// One piece is in flight.
    Fetching,
    /// Nothing in the queue is available at this peer.
    Idle,
    Terminated,
}

/// State of one connection, exclusively owned by its worker.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub choked_by_remote: bool,
    /// Pieces the remote has. Only ever grows.
    pub remote_has: Bitfield,
    pub bitfield_received: bool,
    /// The only piece requested from this peer, if any.
    pub in_flight: Option<PieceDescriptor>,
    pub phase: Phase,
    pieces: usize,
}

impl ConnectionState {
    /// A fresh connection is choked and knows nothing about the peer.
    pub fn new(pieces: usize) -> Self {
        Self {
            choked_by_remote: true,
            remote_has: Bitfield::from_piece(pieces),
            bitfield_received: false,
            in_flight: None,
            phase: Phase::AwaitingAvailability,
            pieces,
        }
    }

    pub fn availability_known(&self) -> bool {
        self.phase != Phase::AwaitingAvailability
    }

    pub fn can_request(&self) -> bool {
        self.availability_known()
            && !self.choked_by_remote
            && self.in_flight.is_none()
            && self.phase != Phase::Terminated
    }

    /// Claim the first piece of the queue that the peer has and return the
    /// request for it, the whole piece as one block. Returns `None` when
    /// requesting is not allowed or no queued piece is available here, in
    /// which case the worker is idle.
    pub fn try_claim(&mut self, queue: &WorkQueue) -> Option<BlockInfo> {
        if !self.can_request() {
            return None;
        }

        let remote_has = &self.remote_has;
        let Some(piece) =
            queue.take_if_available(|p| remote_has.has(p.index as usize))
        else {
            self.phase = Phase::Idle;
            return None;
        };

        let block_info = BlockInfo::new(piece.index, 0, piece.length);
        self.in_flight = Some(piece);
        self.phase = Phase::Fetching;

        Some(block_info)
    }

    fn learned_availability(&mut self) {
        if matches!(self.phase, Phase::AwaitingAvailability | Phase::Idle) {
            self.phase = Phase::Negotiating;
        }
    }

    /// Put the piece in flight back in the queue.
    fn requeue(&mut self, queue: &WorkQueue) {
        if let Some(piece) = self.in_flight.take() {
            debug!("requeue piece {}", piece.index);
            queue.put(piece);
        }
        if self.phase == Phase::Fetching {
            self.phase = Phase::Negotiating;
        }
    }

    /// Apply one message from the remote. Returns the verified piece when
    /// the message completes the piece in flight.
    ///
    /// Errors are protocol violations, fatal to this connection. A piece
    /// that fails verification is not an error, it is requeued.
    pub fn handle(
        &mut self,
        msg: Message,
        queue: &WorkQueue,
    ) -> Result<Option<VerifiedPiece>, Error> {
        match msg {
            Message::KeepAlive => {
                debug!("< keepalive");
            }
            Message::Choke => {
                debug!("< choke");
                self.choked_by_remote = true;
                // the remote discards pending requests when it chokes
                self.requeue(queue);
            }
            Message::Unchoke => {
                debug!("< unchoke");
                self.choked_by_remote = false;
                if self.phase == Phase::Idle {
                    self.phase = Phase::Negotiating;
                }
            }
            Message::Interested => {
                debug!("< interested");
            }
            Message::NotInterested => {
                debug!("< not_interested");
            }
            Message::Have(index) => {
                debug!("< have {index}");
                if index as usize >= self.pieces {
                    return Err(Error::HaveOutOfRange(index));
                }
                let remote_has = std::mem::take(&mut self.remote_has);
                self.remote_has = remote_has.with_piece_marked(index as usize);
                self.learned_availability();
            }
            Message::Bitfield(bitfield) => {
                debug!("< bitfield len {}", bitfield.len());
                if self.bitfield_received {
                    return Err(Error::DuplicateBitfield);
                }
                self.bitfield_received = true;

                let bitfield =
                    Bitfield::from_wire(bitfield.as_raw_slice(), self.pieces);
                let remote_has = std::mem::take(&mut self.remote_has);
                self.remote_has = remote_has.union(&bitfield);
                self.learned_availability();
            }
            Message::Request(block_info) => {
                debug!("< request {block_info:?}, not serving");
            }
            Message::Cancel(block_info) => {
                debug!("< cancel {block_info:?}");
            }
            Message::Piece(block) => {
                debug!(
                    "< piece {} begin {} len {}",
                    block.index,
                    block.begin,
                    block.block.len()
                );

                let Some(in_flight) = &self.in_flight else {
                    return Err(Error::UnsolicitedPiece(block.index));
                };
                if in_flight.index != block.index {
                    return Err(Error::PieceMismatch {
                        expected: in_flight.index,
                        got: block.index,
                    });
                }
                if block.begin != 0 {
                    return Err(Error::PieceOffset(block.begin));
                }

                match in_flight.verify(block.block) {
                    Ok(verified) => {
                        self.in_flight = None;
                        self.phase = Phase::Negotiating;
                        return Ok(Some(verified));
                    }
                    Err(_) => {
                        warn!("piece {} has an invalid hash", block.index);
                        self.requeue(queue);
                    }
                }
            }
            Message::Unknown(id, payload) => {
                let len = payload.len();
                debug!("< unknown message {id} len {len}, skipping");
            }
        }

        Ok(None)
    }
}

/// Timeouts applied to every peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub handshake: Duration,
    /// Longest wait for a message. With a piece in flight or before the peer
    /// says what it has this is fatal, otherwise a keep-alive is sent.
    pub message: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Timeouts {
    fn from(config: &Config) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout_secs),
            handshake: Duration::from_secs(config.handshake_timeout_secs),
            message: Duration::from_secs(config.message_timeout_secs),
        }
    }
}

/// Data shared by all the workers of a download.
#[derive(Debug)]
pub struct WorkerCtx {
    pub info_hash: InfoHash,
    pub local_peer_id: PeerId,
    /// Number of pieces of the torrent.
    pub pieces: usize,
    pub queue: Arc<WorkQueue>,
    pub results: mpsc::Sender<VerifiedPiece>,
    /// Cancels every worker of the download.
    pub cancel: CancellationToken,
    pub timeouts: Timeouts,
    /// Workers with nothing to claim, by worker id, with the queue
    /// generation they last looked at.
    pub idle: watch::Sender<HashMap<usize, u64>>,
}

pub struct Worker {
    pub id: usize,
    pub peer: PeerAddress,
    pub ctx: Arc<WorkerCtx>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(id: usize, peer: PeerAddress, ctx: Arc<WorkerCtx>) -> Self {
        let cancel = ctx.cancel.child_token();
        Self { id, peer, ctx, cancel }
    }

    /// Token that stops only this worker.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Report whether this worker is idle, and at which queue generation.
    fn report_idle(&self, generation: Option<u64>) {
        self.ctx.idle.send_if_modified(|idle| match generation {
            Some(g) => idle.insert(self.id, g) != Some(g),
            None => idle.remove(&self.id).is_some(),
        });
    }

    /// Connect to the peer and download until cancelled, or until the
    /// connection fails.
    #[tracing::instrument(name = "worker", skip_all, fields(peer = %self.peer))]
    pub async fn run(self) -> Result<(), Error> {
        let conn =
            match Connection::open(&self.peer, self.ctx.timeouts.connect).await
            {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("{e}");
                    return Err(e);
                }
            };

        self.run_on(conn).await
    }

    /// Download over an established connection. The piece in flight is
    /// returned to the queue before the connection is closed, on every exit
    /// path.
    pub async fn run_on<T>(self, mut conn: Connection<T>) -> Result<(), Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut state = ConnectionState::new(self.ctx.pieces);

        let r = self.drive(&mut conn, &mut state).await;

        state.requeue(&self.ctx.queue);
        state.phase = Phase::Terminated;
        self.report_idle(None);
        conn.close().await;

        match &r {
            Ok(()) => debug!("worker finished"),
            Err(e) if e.is_protocol_violation() => {
                warn!("protocol violation: {e}")
            }
            Err(e) => warn!("{e}"),
        }

        r
    }

    async fn drive<T>(
        &self,
        conn: &mut Connection<T>,
        state: &mut ConnectionState,
    ) -> Result<(), Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let ctx = &self.ctx;

        timeout(
            ctx.timeouts.handshake,
            conn.handshake(ctx.info_hash, ctx.local_peer_id),
        )
        .await??;

        debug!("> interested");
        conn.send(Message::Interested).await?;

        let mut queue_activity = ctx.queue.subscribe();
        let mut delivered = 0;

        loop {
            if self.cancel.is_cancelled() {
                debug!("cancelled after {delivered} pieces");
                return Ok(());
            }

            // puts made from here on wake an idle worker
            let generation = *queue_activity.borrow_and_update();

            if let Some(block_info) = state.try_claim(&ctx.queue) {
                debug!("> request {block_info:?}");
                conn.send(Message::Request(block_info)).await?;
            }

            let idle = state.phase == Phase::Idle;
            self.report_idle(idle.then_some(generation));

            let msg = select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("cancelled after {delivered} pieces");
                    return Ok(());
                }
                Ok(()) = queue_activity.changed(), if idle => continue,
                msg = timeout(ctx.timeouts.message, conn.receive()) => msg,
            };

            let msg = match msg {
                Ok(msg) => msg?,
                Err(_) => {
                    if let Some(piece) = &state.in_flight {
                        return Err(Error::RequestTimeout(piece.index));
                    }
                    if !state.availability_known() {
                        return Err(Error::Timeout);
                    }
                    debug!("> keepalive");
                    conn.send(Message::KeepAlive).await?;
                    continue;
                }
            };

            let Some(verified) = state.handle(msg, &ctx.queue)? else {
                continue;
            };

            let index = verified.piece.index;
            if ctx.results.send(verified).await.is_err() {
                debug!("results channel closed, download is over");
                return Ok(());
            }
            delivered += 1;
            info!("downloaded piece {index}");
        }
    }
}
