//! Orchestrates a whole download.
//!
//! The coordinator seeds the [`WorkQueue`], runs one [`Worker`] per peer up
//! to a concurrency cap, and is the single writer of the output sink. Workers
//! that stop early are replaced by peers from the backlog, and so are workers
//! whose peer has none of the queued pieces. When the backlog is empty and no
//! worker is left, or every worker left is idle, the download is stalled.
use std::{collections::VecDeque, sync::Arc};

use hashbrown::{HashMap, HashSet};
use tokio::{
    select,
    sync::{mpsc, watch},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    bitfield::{Bitfield, BitfieldExt},
    config::Config,
    disk::OutputSink,
    error::Error,
    metainfo::InfoHash,
    peer::{
        worker::{Timeouts, WorkerCtx},
        PeerAddress, PeerId, Worker,
    },
    piece::{PieceDescriptor, VerifiedPiece},
    queue::WorkQueue,
    utils::to_human_readable,
};

/// Default cap of concurrently connected peers.
pub const MAX_PEERS: usize = 6;

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub pieces: usize,
    pub bytes: u64,
    /// Verified pieces that were delivered more than once and discarded.
    pub duplicates: usize,
    /// Workers started, including the ones that replaced failed workers.
    pub workers: usize,
}

pub struct Download<S: OutputSink> {
    info_hash: InfoHash,
    local_peer_id: PeerId,
    piece_length: u64,
    total_length: u64,
    pieces: usize,
    max_peers: usize,
    timeouts: Timeouts,
    queue: Arc<WorkQueue>,
    sink: S,
}

impl<S: OutputSink> Download<S> {
    /// A download of `pieces` into `sink`. Every piece is written at
    /// `index * piece_length`.
    pub fn new(
        info_hash: InfoHash,
        pieces: Vec<PieceDescriptor>,
        piece_length: u64,
        sink: S,
    ) -> Self {
        let total_length = pieces.iter().map(|p| p.length as u64).sum();
        let n = pieces.len();

        Self {
            info_hash,
            local_peer_id: PeerId::generate(),
            piece_length,
            total_length,
            pieces: n,
            max_peers: MAX_PEERS,
            timeouts: Timeouts::default(),
            queue: Arc::new(WorkQueue::new(pieces)),
            sink,
        }
    }

    pub fn local_peer_id(mut self, v: PeerId) -> Self {
        self.local_peer_id = v;
        self
    }

    pub fn max_peers(mut self, v: usize) -> Self {
        self.max_peers = v.max(1);
        self
    }

    pub fn timeouts(mut self, v: Timeouts) -> Self {
        self.timeouts = v;
        self
    }

    /// Apply the peer cap and timeouts of `config`.
    pub fn config(self, config: &Config) -> Self {
        self.max_peers(config.max_peers).timeouts(Timeouts::from(config))
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Download every piece from `peers`. Returns once all pieces are
    /// written and every worker released its connection.
    ///
    /// A worker whose peer has none of the queued pieces gives its slot to a
    /// peer of the backlog. When the backlog is empty and no worker can make
    /// progress, the download fails with [`Error::DownloadStalled`].
    pub async fn run(
        &mut self,
        peers: Vec<PeerAddress>,
    ) -> Result<DownloadReport, Error> {
        let mut report = DownloadReport {
            pieces: 0,
            bytes: 0,
            duplicates: 0,
            workers: 0,
        };

        if self.pieces == 0 {
            return Ok(report);
        }

        let mut seen = HashSet::new();
        let mut backlog: VecDeque<PeerAddress> =
            peers.into_iter().filter(|p| seen.insert(p.clone())).collect();

        if backlog.is_empty() {
            error!("no peers to download from");
            return Err(Error::NoPeers);
        }

        info!(
            "downloading {} pieces, {} from {} peers",
            self.pieces,
            to_human_readable(self.total_length),
            backlog.len()
        );

        // no more than one result per piece is ever in the channel
        let (tx, mut rx) = mpsc::channel::<VerifiedPiece>(self.pieces);
        let cancel = CancellationToken::new();
        let (idle, mut idle_rx) = watch::channel(HashMap::new());

        let ctx = Arc::new(WorkerCtx {
            info_hash: self.info_hash,
            local_peer_id: self.local_peer_id,
            pieces: self.pieces,
            queue: self.queue.clone(),
            results: tx,
            cancel: cancel.clone(),
            timeouts: self.timeouts,
            idle,
        });

        let mut workers = Workers::default();
        while workers.len() < self.max_peers {
            let Some(peer) = backlog.pop_front() else { break };
            workers.spawn(peer, &ctx);
        }

        let mut delivered = Bitfield::from_piece(self.pieces);

        while report.pieces < self.pieces {
            select! {
                biased;
                Some(piece) = rx.recv() => {
                    if let Err(e) =
                        self.store(piece, &mut delivered, &mut report).await
                    {
                        error!("could not write piece: {e}");
                        shutdown(&cancel, rx, &mut workers).await;
                        return Err(e);
                    }
                }
                Some(()) = workers.join_next() => {
                    if let Some(peer) = backlog.pop_front() {
                        debug!("replacing worker with {peer}");
                        workers.spawn(peer, &ctx);
                    }
                }
                Ok(()) = idle_rx.changed() => {}
            }

            let stuck =
                workers.stuck(&self.queue, &idle_rx.borrow_and_update());

            if !backlog.is_empty() {
                // slots of idle workers go to peers that were never tried,
                // workers already stopping free a slot each
                let free = backlog.len().saturating_sub(workers.stopping());
                for id in stuck.iter().take(free) {
                    workers.evict(*id);
                }
                continue;
            }

            let stalled = workers.is_empty() || stuck.len() == workers.len();
            if !stalled {
                continue;
            }

            // pieces sent by the workers before they stopped or went idle
            while let Ok(piece) = rx.try_recv() {
                if let Err(e) =
                    self.store(piece, &mut delivered, &mut report).await
                {
                    error!("could not write piece: {e}");
                    shutdown(&cancel, rx, &mut workers).await;
                    return Err(e);
                }
            }

            if report.pieces < self.pieces {
                let missing = self.pieces - report.pieces;
                error!("no peer can make progress, {missing} pieces missing");
                shutdown(&cancel, rx, &mut workers).await;
                return Err(Error::DownloadStalled { missing });
            }
        }

        report.workers = workers.started;

        info!("all pieces downloaded, stopping workers");
        shutdown(&cancel, rx, &mut workers).await;

        self.sink.flush().await?;

        info!(
            "download complete, {} written",
            to_human_readable(report.bytes)
        );

        Ok(report)
    }

    /// Write a verified piece at its offset, unless the piece was already
    /// written.
    async fn store(
        &mut self,
        piece: VerifiedPiece,
        delivered: &mut Bitfield,
        report: &mut DownloadReport,
    ) -> Result<(), Error> {
        let index = piece.piece.index as usize;

        if delivered.has(index) {
            warn!("piece {index} was delivered twice, discarding");
            report.duplicates += 1;
            return Ok(());
        }

        let offset = index as u64 * self.piece_length;
        self.sink.write_at(offset, &piece.data).await?;

        *delivered = std::mem::take(delivered).with_piece_marked(index);
        report.pieces += 1;
        report.bytes += piece.data.len() as u64;

        info!(
            "{}/{} pieces, {} of {}",
            report.pieces,
            self.pieces,
            to_human_readable(report.bytes),
            to_human_readable(self.total_length)
        );

        Ok(())
    }
}

/// Running workers, with the token that stops each one of them.
#[derive(Default)]
struct Workers {
    tasks: JoinSet<usize>,
    tokens: HashMap<usize, CancellationToken>,
    /// Workers started so far, the next worker id.
    started: usize,
}

impl Workers {
    fn spawn(&mut self, peer: PeerAddress, ctx: &Arc<WorkerCtx>) {
        let worker = Worker::new(self.started, peer, ctx.clone());
        let id = worker.id;

        self.tokens.insert(id, worker.cancel_token());
        self.tasks.spawn(async move {
            // failures are logged by the worker
            let _ = worker.run().await;
            id
        });
        self.started += 1;
    }

    /// Wait for a worker to exit. Returns `None` when none is running.
    async fn join_next(&mut self) -> Option<()> {
        match self.tasks.join_next().await? {
            Ok(id) => {
                self.tokens.remove(&id);
            }
            Err(e) => error!("worker task failed: {e}"),
        }
        Some(())
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Running workers that cannot claim any queued piece. A worker counts
    /// only if it looked at the queue after the last piece was put back, so
    /// a worker about to wake up is never stuck.
    fn stuck(
        &self,
        queue: &WorkQueue,
        idle: &HashMap<usize, u64>,
    ) -> Vec<usize> {
        if queue.is_empty() {
            return Vec::new();
        }
        let generation = queue.generation();

        let mut stuck: Vec<usize> = idle
            .iter()
            .filter(|(id, g)| **g == generation && self.is_running(**id))
            .map(|(id, _)| *id)
            .collect();
        stuck.sort_unstable();
        stuck
    }

    /// Workers that were told to stop and did not exit yet.
    fn stopping(&self) -> usize {
        self.tokens.values().filter(|token| token.is_cancelled()).count()
    }

    fn is_running(&self, id: usize) -> bool {
        self.tokens.get(&id).is_some_and(|token| !token.is_cancelled())
    }

    fn evict(&mut self, id: usize) {
        if let Some(token) = self.tokens.get(&id) {
            debug!("worker {id} has nothing to download, releasing its peer");
            token.cancel();
        }
    }
}

/// Cancel the workers and wait for all of them to close their connection.
async fn shutdown(
    cancel: &CancellationToken,
    rx: mpsc::Receiver<VerifiedPiece>,
    workers: &mut Workers,
) {
    cancel.cancel();
    drop(rx);
    while workers.join_next().await.is_some() {}
}
