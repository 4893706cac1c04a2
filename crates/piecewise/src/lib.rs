//! The peer wire engine and piece scheduler of the `pcw` BitTorrent
//! downloader.
//!
//! A [`download::Download`] seeds a shared [`queue::WorkQueue`] with every
//! piece of a torrent and runs one [`peer::Worker`] per peer. Each worker
//! owns one [`peer::Connection`], claims pieces its peer has, requests them
//! as a single block, verifies their hash and hands them to the coordinator,
//! the only writer of the output file. A piece that a worker fails to
//! deliver goes back to the queue for another worker.
//!
//! # Example
//!
//! ```no_run
//! use piecewise::{
//!     disk::FileSink, download::Download, metainfo::MetaInfo,
//!     peer::PeerAddress, error::Error,
//! };
//!
//! # async fn run() -> Result<(), Error> {
//! let bytes = std::fs::read("debian.iso.torrent")?;
//! let meta = MetaInfo::from_bytes(&bytes)?;
//!
//! let sink = FileSink::create(meta.name(), meta.total_length()).await?;
//! let mut download =
//!     Download::new(meta.info_hash, meta.pieces(), meta.piece_length(), sink);
//!
//! let peers = vec![PeerAddress::new("127.0.0.1", 6881)];
//! download.run(peers).await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod bitfield;
pub mod config;
pub mod disk;
pub mod download;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod queue;
pub mod tcp_wire;
pub mod tracker;
pub mod utils;
