//! Shared pool of pieces that still need to be downloaded.
//!
//! Pieces cycle between this queue and the `in_flight` slot of a worker. A
//! worker removes a piece with [`WorkQueue::take_if_available`] and either
//! delivers it verified, or puts it back with [`WorkQueue::put`].
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use tokio::sync::watch;
use tracing::warn;

use crate::piece::PieceDescriptor;

#[derive(Debug)]
pub struct WorkQueue {
    pieces: Mutex<VecDeque<PieceDescriptor>>,
    capacity: usize,
    /// Bumped on every `put`, idle workers wait on it for new work.
    generation: watch::Sender<u64>,
}

impl WorkQueue {
    /// Create a queue seeded with `pieces`, in order. The capacity is the
    /// number of pieces, no more than that many descriptors ever exist.
    pub fn new(pieces: impl IntoIterator<Item = PieceDescriptor>) -> Self {
        let pieces: VecDeque<PieceDescriptor> = pieces.into_iter().collect();
        let capacity = pieces.len();
        let (generation, _) = watch::channel(0);
        Self { pieces: Mutex::new(pieces), capacity, generation }
    }

    /// The lock is never held across an await point, a poisoned lock still
    /// has a consistent deque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<PieceDescriptor>> {
        self.pieces.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a piece to the back of the queue. Never blocks.
    pub fn put(&self, piece: PieceDescriptor) {
        {
            let mut pieces = self.lock();
            if pieces.len() >= self.capacity {
                warn!(
                    "queue is over capacity ({}) when returning piece {}",
                    self.capacity, piece.index
                );
            }
            pieces.push_back(piece);
        }
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Remove and return the first piece matching `predicate`, pieces that
    /// don't match keep their position. Returns `None` without blocking if no
    /// piece matches.
    pub fn take_if_available<F>(
        &self,
        mut predicate: F,
    ) -> Option<PieceDescriptor>
    where
        F: FnMut(&PieceDescriptor) -> bool,
    {
        let mut pieces = self.lock();
        let pos = pieces.iter().position(|p| predicate(p))?;
        pieces.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Indices of the queued pieces, in queue order.
    pub fn indices(&self) -> Vec<u32> {
        self.lock().iter().map(|p| p.index).collect()
    }

    /// Number of pieces put back so far. A worker that found nothing to claim
    /// at the current generation cannot find anything until it changes.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Subscribe to queue activity. The receiver is notified every time a
    /// piece is put back.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn pieces(n: u32) -> Vec<PieceDescriptor> {
        (0..n).map(|i| PieceDescriptor::new(i, [i as u8; 20], 4)).collect()
    }

    #[test]
    fn take_is_first_fit() {
        let queue = WorkQueue::new(pieces(4));
        assert_eq!(queue.capacity(), 4);

        let p = queue.take_if_available(|p| p.index % 2 == 1).unwrap();
        assert_eq!(p.index, 1);
        assert_eq!(queue.indices(), vec![0, 2, 3]);

        assert!(queue.take_if_available(|p| p.index > 10).is_none());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn put_goes_to_the_back() {
        let queue = WorkQueue::new(pieces(3));
        let p = queue.take_if_available(|_| true).unwrap();
        assert_eq!(p.index, 0);

        queue.put(p);
        assert_eq!(queue.indices(), vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn put_notifies_subscribers() {
        let queue = WorkQueue::new(pieces(1));
        let mut rx = queue.subscribe();

        let p = queue.take_if_available(|_| true).unwrap();
        assert!(queue.is_empty());
        queue.put(p);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn concurrent_takers_never_share_a_piece() {
        let queue = Arc::new(WorkQueue::new(pieces(200)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(p) = queue.take_if_available(|_| true) {
                        taken.push(p.index);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<u32> =
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();

        assert_eq!(all, (0..200).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
