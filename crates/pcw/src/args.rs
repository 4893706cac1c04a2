use std::path::PathBuf;

use clap::{ArgAction, Parser};
use piecewise::{config::Config, peer::PeerAddress};
use tracing::Level;

#[derive(Parser, Debug, Default)]
#[clap(name = "pcw")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Path of the .torrent file to download.
    pub torrent: PathBuf,

    /// Existing folder where the file will be written. Defaults to the
    /// download folder of the configuration.
    pub out_dir: Option<PathBuf>,

    /// Maximum number of peers connected at the same time.
    #[clap(long)]
    pub max_peers: Option<usize>,

    /// Port announced to the tracker.
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Download from this peer instead of asking the tracker, can be
    /// repeated.
    #[clap(long = "peer", value_name = "HOST:PORT")]
    pub peers: Vec<PeerAddress>,

    /// Write logs to this file instead of stderr.
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Log more, -v for debug and -vv for trace.
    #[clap(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Ignore the configuration file and use the default values.
    #[clap(long)]
    pub no_config: bool,
}

impl Args {
    /// Override the values of `config` with the flags that were given.
    pub fn apply(&self, config: &mut Config) {
        if let Some(max_peers) = self.max_peers {
            config.max_peers = max_peers;
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(dir) = &self.out_dir {
            config.download_dir = dir.to_string_lossy().into_owned();
        }
    }

    pub fn log_level(&self, config: &Config) -> Level {
        match self.verbose {
            0 => config.log_level.parse().unwrap_or(Level::INFO),
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
