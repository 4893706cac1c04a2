use std::{fmt::Display, io};

use thiserror::Error;

impl From<bendy::decoding::Error> for Error {
    fn from(value: bendy::decoding::Error) -> Self {
        Self::BencodeDecode(value.to_string())
    }
}

impl From<bendy::encoding::Error> for Error {
    fn from(value: bendy::encoding::Error) -> Self {
        Self::BencodeEncode(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("Could not connect to peer {addr}: {source}")]
    PeerConnect { addr: String, source: io::Error },

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("The peer took to long to respond")]
    Timeout,

    #[error("The requested piece {0} took to long to arrive")]
    RequestTimeout(u32),

    #[error("The handshake received is not valid")]
    HandshakeInvalid,

    #[error("The info hash of the handshake does not match ours")]
    InfoHashMismatch,

    #[error("Tried to exchange messages before the handshake")]
    NotHandshaked,

    #[error("Could not decode message {0}: payload is malformed")]
    MessageMalformed(u8),

    #[error("Message of {0} bytes is larger than the maximum allowed")]
    MessageTooLarge(usize),

    #[error("Received piece {0} which was never requested")]
    UnsolicitedPiece(u32),

    #[error("Expected piece {expected} but received {got}")]
    PieceMismatch { expected: u32, got: u32 },

    #[error("Received piece {0} with an offset, whole pieces were requested")]
    PieceOffset(u32),

    #[error("The peer sent a second bitfield")]
    DuplicateBitfield,

    #[error("The peer announced piece {0} which is out of range")]
    HaveOutOfRange(u32),

    #[error("The piece downloaded does not have a valid hash")]
    PieceInvalid,

    #[error("Error when serializing/deserializing the handshake")]
    SpeedyError(#[from] speedy::Error),

    #[error("Download stalled, no peer can send the {missing} missing pieces")]
    DownloadStalled { missing: usize },

    #[error("No peers to download from")]
    NoPeers,

    #[error("Failed to decode the bencode buffer: {0}")]
    BencodeDecode(String),

    #[error("Failed to encode the bencode buffer: {0}")]
    BencodeEncode(String),

    #[error("The bencode buffer has trailing bytes after the value")]
    BencodeTrailingBytes,

    #[error("The bencode buffer is empty")]
    BencodeEmpty,

    #[error("The torrent is missing the field `{0}`")]
    MetaInfoMissing(&'static str),

    #[error("The pieces field must have a length multiple of 20")]
    MetaInfoPieces,

    #[error("Multi-file torrents are not supported")]
    MetaInfoMultiFile,

    #[error("The torrent has zero length or zero piece length")]
    MetaInfoEmpty,

    #[error("Pieces of {0} bytes are larger than the maximum supported")]
    MetaInfoPieceLength(u64),

    #[error("`{0}` is not a valid file name")]
    MetaInfoName(String),

    #[error("Tracker request failed: {0}")]
    TrackerRequest(#[from] reqwest::Error),

    #[error("Tracker answered with status {0}")]
    TrackerStatus(u16),

    #[error("Tracker returned a failure: {0}")]
    TrackerFailure(String),

    #[error("The peer list returned by the announce request is not valid")]
    TrackerCompactPeerList,

    #[error("The tracker response is missing `{0}`")]
    TrackerResponse(&'static str),

    #[error("The torrent has no HTTP tracker to announce to")]
    TrackerNoHosts,

    #[error("Invalid announce parameter: {0}")]
    TrackerInvalidParam(&'static str),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Could not open the folder `{0}`. Please make sure the program has \
         permission to open it and that the folder exist"
    )]
    FolderOpenError(String),

    #[error(
        "Could not open the file `{0}`. Please make sure the program has \
         permission to create it"
    )]
    FileOpenError(String),

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format"
    )]
    ConfigDeserializeError(#[from] toml::de::Error),

    #[error("Error while trying to write the configuration file")]
    ConfigSerializeError(#[from] toml::ser::Error),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_value: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl Error {
    /// Errors caused by a peer breaking the wire protocol. These are always
    /// fatal to the connection that produced them, and only to that one.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::HandshakeInvalid
                | Error::InfoHashMismatch
                | Error::NotHandshaked
                | Error::MessageMalformed(_)
                | Error::MessageTooLarge(_)
                | Error::UnsolicitedPiece(_)
                | Error::PieceMismatch { .. }
                | Error::PieceOffset(_)
                | Error::DuplicateBitfield
                | Error::HaveOutOfRange(_)
        )
    }

    pub(crate) fn peer_connect(addr: impl Display, source: io::Error) -> Self {
        Self::PeerConnect { addr: addr.to_string(), source }
    }
}
