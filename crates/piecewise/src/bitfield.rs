//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

/// Piece availability operations on a [`Bitfield`].
///
/// Marking is by value: a worker replaces its availability with the returned
/// bitfield, it never flips bits of a bitfield it has handed out.
pub trait BitfieldExt: Sized {
    /// An empty bitfield sized for `pieces` pieces.
    fn from_piece(pieces: usize) -> Self;

    /// Bitfield received from the wire, truncated to `pieces` bits. Spare
    /// bits of the last byte are dropped.
    fn from_wire(bytes: &[u8], pieces: usize) -> Self;

    /// Return the bitfield with `index` set, growing it if needed.
    fn with_piece_marked(self, index: usize) -> Self;

    /// Return the union of both bitfields, as long as the longest of them.
    fn union(self, other: &Self) -> Self;

    /// If `index` is set. Out of range indices are not set.
    fn has(&self, index: usize) -> bool;
}

impl BitfieldExt for Bitfield {
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    fn from_wire(bytes: &[u8], pieces: usize) -> Bitfield {
        let mut b = Bitfield::from_slice(bytes);
        b.resize(pieces, false);
        b
    }

    fn with_piece_marked(mut self, index: usize) -> Bitfield {
        if self.len() <= index {
            self.resize(index + 1, false);
        }
        self.set(index, true);
        self
    }

    fn union(mut self, other: &Bitfield) -> Bitfield {
        if self.len() < other.len() {
            self.resize(other.len(), false);
        }
        for index in other.iter_ones() {
            self.set(index, true);
        }
        self
    }

    fn has(&self, index: usize) -> bool {
        self.get(index).map(|b| *b).unwrap_or(false)
    }
}
