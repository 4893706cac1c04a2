use std::{fs::OpenOptions, path::Path, process::ExitCode};

use clap::Parser;
use piecewise::{
    config::Config,
    disk::FileSink,
    download::Download,
    error::Error,
    metainfo::MetaInfo,
    peer::PeerId,
    tracker::{Request, Tracker},
    utils::to_human_readable,
};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;

mod args;

use args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pcw: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let mut config =
        if args.no_config { Config::default() } else { Config::load().await? };
    args.apply(&mut config);

    // logs are lost once the guard is dropped
    let level = args.log_level(&config);
    let _guard = init_logging(level, args.log_file.as_deref())?;

    let out_dir = Path::new(&config.download_dir);
    if !tokio::fs::metadata(out_dir).await.is_ok_and(|m| m.is_dir()) {
        return Err(Error::FolderOpenError(config.download_dir.clone()));
    }

    let bytes = tokio::fs::read(&args.torrent).await.map_err(|_| {
        Error::FileOpenError(args.torrent.to_string_lossy().into_owned())
    })?;
    let meta = MetaInfo::from_bytes(&bytes)?;

    info!(
        "{} {}, {} pieces, info hash {}",
        meta.name(),
        to_human_readable(meta.total_length()),
        meta.piece_count(),
        meta.info_hash
    );

    let local_peer_id = PeerId::generate();

    let peers = if args.peers.is_empty() {
        let tracker = Tracker::new()?;
        let req = Request::started(
            meta.info_hash,
            local_peer_id,
            config.listen_port,
            meta.total_length(),
        );
        tracker.announce_any(&meta.announce_urls(), &req).await?.peers
    } else {
        info!("skipping the tracker, {} peers given", args.peers.len());
        args.peers.clone()
    };

    let path = out_dir.join(meta.name());
    let sink = FileSink::create(&path, meta.total_length()).await?;

    let mut download =
        Download::new(meta.info_hash, meta.pieces(), meta.piece_length(), sink)
            .local_peer_id(local_peer_id)
            .config(&config);

    let report = download.run(peers).await?;

    println!("{} {}", path.display(), to_human_readable(report.bytes));

    Ok(())
}

/// Log to stderr, or to `log_file` through a non blocking writer.
fn init_logging(
    level: Level,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>, Error> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .with_file(false);

    let Some(log_file) = log_file else {
        builder.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|_| {
            Error::FileOpenError(log_file.to_string_lossy().into_owned())
        })?;

    let (writer, guard) = tracing_appender::non_blocking(file);
    builder.with_writer(writer).with_ansi(false).init();

    Ok(Some(guard))
}
