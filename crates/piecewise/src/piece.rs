//! Pieces of a torrent, as requested from peers and delivered to the disk.
use sha1_smol::Sha1;

use crate::error::Error;

/// What a worker needs to know to fetch and verify one piece.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PieceDescriptor {
    /// Zero based index of the piece.
    pub index: u32,
    /// Expected SHA-1 of the piece data.
    pub hash: [u8; 20],
    /// Exact byte length of the piece, only the last one may be shorter.
    pub length: u32,
}

/// A piece whose data matches the expected hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedPiece {
    pub piece: PieceDescriptor,
    pub data: Vec<u8>,
}

impl PieceDescriptor {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> Self {
        Self { index, hash, length }
    }

    /// Check the length and hash of `data`, consuming it into a
    /// [`VerifiedPiece`] if both match.
    pub fn verify(&self, data: Vec<u8>) -> Result<VerifiedPiece, Error> {
        if data.len() != self.length as usize {
            return Err(Error::PieceInvalid);
        }

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let hash = hasher.digest().bytes();

        if hash != self.hash {
            return Err(Error::PieceInvalid);
        }

        Ok(VerifiedPiece { piece: self.clone(), data })
    }
}

/// SHA-1 digest of `data`.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.digest().bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_hash() {
        let piece = PieceDescriptor::new(0, sha1(b"ABCD"), 4);
        let verified = piece.verify(b"ABCD".to_vec()).unwrap();
        assert_eq!(verified.piece, piece);
        assert_eq!(verified.data, b"ABCD");
    }

    #[test]
    fn verify_rejects_bad_data() {
        let piece = PieceDescriptor::new(0, sha1(b"ABCD"), 4);
        assert!(matches!(
            piece.verify(b"ABCX".to_vec()),
            Err(Error::PieceInvalid)
        ));
        assert!(matches!(
            piece.verify(b"ABC".to_vec()),
            Err(Error::PieceInvalid)
        ));
    }
}
