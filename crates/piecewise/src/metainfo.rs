//! Metainfo is a .torrent file with information about the Torrent.
use std::fmt::Display;

use bendy::decoding::{self, FromBencode, Object, ResultExt};
use bendy::encoding::AsString;
use hashbrown::HashSet;
use speedy::{Readable, Writable};

use crate::{
    bencode,
    error::Error,
    piece::{sha1, PieceDescriptor},
    tcp_wire::MAX_PIECE_LEN,
};

/// SHA-1 of the bencoded `info` dictionary, identifies a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct InfoHash(pub [u8; 20]);

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s[..10])
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl From<InfoHash> for [u8; 20] {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct MetaInfo {
    pub announce: Option<String>,
    pub announce_list: Option<Vec<Vec<String>>>,
    pub info: Info,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<u64>,
    /// Not part of the file, computed by [`MetaInfo::from_bytes`].
    pub info_hash: InfoHash,
}

/// File related information, single file format only.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    /// Name of the file.
    pub name: String,
    /// Number of bytes in a piece.
    pub piece_length: u64,
    /// Concatenation of the 20 byte SHA-1 of every piece.
    pub pieces: Vec<u8>,
    /// Length of the entire file.
    pub length: Option<u64>,
    /// Set when the torrent has a `files` list.
    pub multi_file: bool,
}

impl MetaInfo {
    /// Parse and validate a .torrent file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut meta = MetaInfo::from_bencode(bytes)?;

        // the info hash must be computed over the exact bytes of the info
        // dictionary, the generic value keeps every field
        let value = bencode::decode(bytes)?;
        let info = value.get(b"info").ok_or(Error::MetaInfoMissing("info"))?;
        meta.info_hash = InfoHash(sha1(&bencode::encode(info)?));

        meta.validate()?;

        Ok(meta)
    }

    fn validate(&self) -> Result<(), Error> {
        let info = &self.info;

        if info.multi_file {
            return Err(Error::MetaInfoMultiFile);
        }
        let length = info.length.ok_or(Error::MetaInfoMissing("length"))?;

        // the name becomes a path relative to the output folder
        let name = info.name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(Error::MetaInfoName(info.name.clone()));
        }

        if length == 0 || info.piece_length == 0 {
            return Err(Error::MetaInfoEmpty);
        }
        if info.piece_length > MAX_PIECE_LEN as u64 {
            return Err(Error::MetaInfoPieceLength(info.piece_length));
        }
        if info.pieces.len() % 20 != 0 {
            return Err(Error::MetaInfoPieces);
        }

        let expected = length.div_ceil(info.piece_length);
        if (info.pieces.len() / 20) as u64 != expected {
            return Err(Error::MetaInfoPieces);
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn piece_length(&self) -> u64 {
        self.info.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.info.length.unwrap_or(0)
    }

    pub fn piece_count(&self) -> usize {
        self.info.pieces.len() / 20
    }

    /// One descriptor per piece. Every piece has the piece length except the
    /// last, which has what is left of the file.
    pub fn pieces(&self) -> Vec<PieceDescriptor> {
        let n = self.piece_count() as u64;
        let piece_length = self.piece_length();
        let total = self.total_length();

        self.info
            .pieces
            .chunks_exact(20)
            .enumerate()
            .map(|(i, chunk)| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);

                let index = i as u64;
                let length = if index + 1 == n {
                    total - index * piece_length
                } else {
                    piece_length
                };

                PieceDescriptor::new(i as u32, hash, length as u32)
            })
            .collect()
    }

    /// Tracker URLs, the tiers of `announce-list` flattened in order, or
    /// `announce` when there is no list.
    pub fn announce_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();

        let mut urls: Vec<String> = self
            .announce_list
            .iter()
            .flatten()
            .flatten()
            .filter(|url| seen.insert(url.as_str()))
            .cloned()
            .collect();

        if urls.is_empty() {
            urls.extend(self.announce.clone());
        }

        urls
    }
}

impl FromBencode for MetaInfo {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut announce = None;
        let mut announce_list = None;
        let mut comment = None;
        let mut created_by = None;
        let mut creation_date = None;
        let mut info = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"announce", value) => {
                    announce = String::decode_bencode_object(value)
                        .context("announce")
                        .map(Some)?;
                }
                (b"announce-list", value) => {
                    announce_list = Vec::decode_bencode_object(value)
                        .context("announce-list")
                        .map(Some)?;
                }
                (b"comment", value) => {
                    comment = String::decode_bencode_object(value)
                        .context("comment")
                        .map(Some)?;
                }
                (b"created by", value) => {
                    created_by = String::decode_bencode_object(value)
                        .context("created by")
                        .map(Some)?;
                }
                (b"creation date", value) => {
                    creation_date = u64::decode_bencode_object(value)
                        .context("creation date")
                        .map(Some)?;
                }
                (b"info", value) => {
                    info = Info::decode_bencode_object(value)
                        .context("info")
                        .map(Some)?;
                }
                _ => {}
            }
        }

        let info =
            info.ok_or_else(|| decoding::Error::missing_field("info"))?;

        Ok(MetaInfo {
            announce,
            announce_list,
            info,
            comment,
            created_by,
            creation_date,
            info_hash: InfoHash::default(),
        })
    }
}

impl FromBencode for Info {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut length = None;
        let mut multi_file = false;
        let mut name = None;
        let mut piece_length = None;
        let mut pieces = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"files", _) => {
                    multi_file = true;
                }
                (b"length", value) => {
                    length = u64::decode_bencode_object(value)
                        .context("length")
                        .map(Some)?;
                }
                (b"name", value) => {
                    name = String::decode_bencode_object(value)
                        .context("name")
                        .map(Some)?;
                }
                (b"piece length", value) => {
                    piece_length = u64::decode_bencode_object(value)
                        .context("piece length")
                        .map(Some)?;
                }
                (b"pieces", value) => {
                    pieces = AsString::decode_bencode_object(value)
                        .context("pieces")
                        .map(|bytes| Some(bytes.0))?;
                }
                _ => {}
            }
        }

        let name =
            name.ok_or_else(|| decoding::Error::missing_field("name"))?;
        let piece_length = piece_length
            .ok_or_else(|| decoding::Error::missing_field("piece length"))?;
        let pieces =
            pieces.ok_or_else(|| decoding::Error::missing_field("pieces"))?;

        Ok(Info { name, piece_length, pieces, length, multi_file })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::bencode::Value;

    /// Bencoded single file torrent of `data`.
    fn torrent_bytes(
        data: &[u8],
        piece_length: usize,
        extra_info: &[(&str, Value)],
    ) -> Vec<u8> {
        let pieces: Vec<u8> =
            data.chunks(piece_length).flat_map(sha1).collect();

        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Value::Integer(data.len() as i64));
        info.insert(b"name".to_vec(), Value::from("file.bin"));
        info.insert(
            b"piece length".to_vec(),
            Value::Integer(piece_length as i64),
        );
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));
        for (k, v) in extra_info {
            info.insert(k.as_bytes().to_vec(), v.clone());
        }

        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::from("http://tracker.example/announce"),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));

        bencode::encode(&Value::Dict(root)).unwrap()
    }

    #[test]
    fn single_file_torrent() {
        let bytes = torrent_bytes(b"ABCDEFG", 4, &[]);
        let meta = MetaInfo::from_bytes(&bytes).unwrap();

        assert_eq!(meta.name(), "file.bin");
        assert_eq!(meta.total_length(), 7);
        assert_eq!(meta.piece_length(), 4);
        assert_eq!(
            meta.announce_urls(),
            vec!["http://tracker.example/announce".to_owned()]
        );

        let pieces = meta.pieces();
        assert_eq!(
            pieces,
            vec![
                PieceDescriptor::new(0, sha1(b"ABCD"), 4),
                PieceDescriptor::new(1, sha1(b"EFG"), 3),
            ]
        );
    }

    #[test]
    fn info_hash_covers_unknown_fields() {
        let private = [("private", Value::Integer(1))];
        let bytes = torrent_bytes(b"ABCDEFG", 4, &private);
        let meta = MetaInfo::from_bytes(&bytes).unwrap();

        let start = bytes
            .windows(6)
            .position(|w| w == b"4:info")
            .map(|p| p + 6)
            .unwrap();
        // the info dictionary runs until the end of the root dictionary
        let info_bytes = &bytes[start..bytes.len() - 1];
        assert!(info_bytes.ends_with(b"7:privatei1ee"));

        assert_eq!(meta.info_hash, InfoHash(sha1(info_bytes)));
    }

    #[test]
    fn announce_list_is_flattened() {
        let meta = MetaInfo {
            announce: Some("http://a/announce".to_owned()),
            announce_list: Some(vec![
                vec!["http://b/announce".to_owned()],
                vec![
                    "udp://c:80".to_owned(),
                    "http://b/announce".to_owned(),
                ],
            ]),
            ..Default::default()
        };

        assert_eq!(
            meta.announce_urls(),
            vec!["http://b/announce".to_owned(), "udp://c:80".to_owned()]
        );
    }

    #[test]
    fn rejects_invalid_torrents() {
        let files = [("files", Value::List(vec![]))];
        let bytes = torrent_bytes(b"ABCDEFG", 4, &files);
        assert!(matches!(
            MetaInfo::from_bytes(&bytes),
            Err(Error::MetaInfoMultiFile)
        ));

        let bytes =
            torrent_bytes(b"ABCDEFG", 4, &[("pieces", Value::from("short"))]);
        assert!(matches!(
            MetaInfo::from_bytes(&bytes),
            Err(Error::MetaInfoPieces)
        ));

        // one hash for a file of two pieces
        let bytes = torrent_bytes(
            b"ABCDEFG",
            4,
            &[("pieces", Value::Bytes(sha1(b"ABCD").to_vec()))],
        );
        assert!(matches!(
            MetaInfo::from_bytes(&bytes),
            Err(Error::MetaInfoPieces)
        ));

        let bytes = torrent_bytes(b"", 4, &[]);
        assert!(matches!(
            MetaInfo::from_bytes(&bytes),
            Err(Error::MetaInfoEmpty)
        ));

        let bytes =
            torrent_bytes(b"ABCDEFG", 4, &[("name", Value::from("../escape"))]);
        assert!(matches!(
            MetaInfo::from_bytes(&bytes),
            Err(Error::MetaInfoName(name)) if name == "../escape"
        ));

        assert!(MetaInfo::from_bytes(b"d8:announce1:ae").is_err());
        assert!(MetaInfo::from_bytes(b"not bencode").is_err());
    }
}
