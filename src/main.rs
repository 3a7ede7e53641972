use std::path::PathBuf;

use anyhow::{Context, bail};
use log::{info, warn};
use rustorrent::client::{Client, Config, Notification};
use rustorrent::storage::FileWriter;
use rustorrent::torrent::Torrent;
use rustorrent::tracker::{Event, Tracker, TrackerRequest};
use size::Size;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "usage: rustorrent <info|peers|download> <file.torrent> [output]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let command = args.next().context(USAGE)?;
    let path = args.next().context(USAGE)?;
    let torrent = Torrent::from_file(&path)
        .await
        .with_context(|| format!("failed to load {}", path))?;

    match command.as_str() {
        "info" => println!("{}", torrent),
        "peers" => peers(&torrent, Config::new()).await?,
        "download" => download(torrent, args.next().map(PathBuf::from)).await?,
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }
    Ok(())
}

/// A single `started` announce, printing what the tracker answered.
async fn peers(torrent: &Torrent, config: Config) -> anyhow::Result<()> {
    let tracker = Tracker::new(config.tracker_timeout)?;
    let request = TrackerRequest {
        announce: torrent.announce.clone(),
        info_hash: torrent.info.info_hash,
        peer_id: config.client_id,
        port: config.port,
        uploaded: Size::from_bytes(0),
        downloaded: Size::from_bytes(0),
        left: Size::from_bytes(torrent.info.total_size()),
        event: Some(Event::Started),
        tracker_id: None,
    };
    let result = tracker
        .announce(&request)
        .await
        .with_context(|| format!("announce to {} failed", torrent.announce))?;
    println!("{}", result);
    Ok(())
}

async fn download(torrent: Torrent, output: Option<PathBuf>) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from(torrent.info.name()));
    let config = Config::new();
    let (storage_tx, storage_rx) = mpsc::channel(config.channel_buffer);
    let (notifications_tx, mut notifications_rx) = mpsc::channel(config.channel_buffer);

    let writer = FileWriter::create(&output, torrent.info.total_size(), torrent.info.piece_size)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;
    let writer = tokio::spawn(writer.run(storage_rx));

    tokio::spawn(async move {
        while let Some(notification) = notifications_rx.recv().await {
            match notification {
                Notification::Stats(stats) => info!(
                    "{:.2}% ({} pieces left), {} downloaded, {} peers",
                    stats.completed(),
                    stats.remaining_pieces,
                    stats.downloaded,
                    stats.connected_peers
                ),
                Notification::PieceCorrupted(piece) => warn!("piece {} failed verification", piece),
                other => log::debug!("{:?}", other),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down...");
            ctrl_c.cancel();
        }
    });

    let client = Client::new(torrent, config, storage_tx, notifications_tx)?;
    let result = client.download(cancel).await;
    let written = writer.await??;
    let summary = result?;
    info!(
        "saved {} pieces ({}) to {} from {} peers in {:?}",
        written,
        summary.downloaded,
        output.display(),
        summary.peers,
        summary.elapsed
    );
    Ok(())
}
