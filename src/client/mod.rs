mod config;
mod notification;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use size::Size;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, interval, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::peer::{Connection, PeerError, Swarm};
use crate::scheduler::Scheduler;
use crate::storage::VerifiedPiece;
use crate::torrent::Torrent;
use crate::tracker::{AnnounceResult, Event, Tracker, TrackerError, TrackerRequest};

pub use config::Config;
pub use notification::{Notification, Stats};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("download incomplete, {remaining} pieces remaining and no more peers")]
    Incomplete { remaining: usize },

    #[error("download aborted")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub pieces: usize,
    pub downloaded: Size,
    /// Distinct peer addresses a connection was attempted to
    pub peers: usize,
    pub elapsed: Duration,
}

/// Drives a single torrent download: announces to the tracker, runs a connection per peer and
/// stops once every piece was verified and handed to storage.
pub struct Client {
    torrent: Torrent,
    config: Arc<Config>,
    tracker: Tracker,
    storage_tx: mpsc::Sender<VerifiedPiece>,
    notifications_tx: mpsc::Sender<Notification>,
}

enum Outcome {
    Complete,
    Incomplete(usize),
    Aborted,
}

/// Re-announce bookkeeping.
struct Announces {
    event: Option<Event>,
    tracker_id: Option<String>,
    interval: Duration,
    retry_interval: Duration,
    /// Lower bound for both intervals, whatever the tracker asks for
    floor: Duration,
    last: Instant,
    next: Instant,
    /// Announces made with no open connection since the last handshake or verified piece
    attempts: usize,
    last_remaining: usize,
    last_sessions: usize,
}

impl Announces {
    fn new(config: &Config, remaining: usize) -> Self {
        let now = Instant::now();
        Self {
            event: Some(Event::Started),
            tracker_id: None,
            interval: config.announce_retry_interval,
            retry_interval: config.announce_retry_interval,
            floor: config.announce_retry_interval,
            last: now,
            next: now,
            attempts: 0,
            last_remaining: remaining,
            last_sessions: 0,
        }
    }

    /// Any new handshake or verified piece means the swarm is still useful.
    fn progress(&mut self, remaining: usize, sessions: usize) {
        if remaining < self.last_remaining || sessions > self.last_sessions {
            self.attempts = 0;
            self.last_remaining = remaining;
            self.last_sessions = sessions;
        }
    }

    fn succeeded(&mut self, result: &AnnounceResult) {
        self.event = None;
        self.interval = result.interval.max(self.floor);
        if let Some(min_interval) = result.min_interval {
            self.retry_interval = min_interval.max(self.floor);
        }
        if let Some(tracker_id) = &result.tracker_id {
            self.tracker_id = Some(tracker_id.clone());
        }
    }

    /// Earliest time the tracker may be asked for more peers because none are left.
    fn peers_exhausted(&mut self) {
        self.next = self.next.min(self.last + self.retry_interval);
    }
}

impl Client {
    pub fn new(
        torrent: Torrent,
        config: Config,
        storage_tx: mpsc::Sender<VerifiedPiece>,
        notifications_tx: mpsc::Sender<Notification>,
    ) -> Result<Self, TrackerError> {
        let tracker = Tracker::new(config.tracker_timeout)?;
        Ok(Self {
            torrent,
            config: Arc::new(config),
            tracker,
            storage_tx,
            notifications_tx,
        })
    }

    /// Downloads every piece. Cancelling `cancel` stops all connections and yields
    /// [`DownloadError::Aborted`] once they're all gone.
    pub async fn download(self, cancel: CancellationToken) -> Result<Summary, DownloadError> {
        let start = Instant::now();
        let info = &self.torrent.info;
        let total_pieces = info.total_pieces();
        let scheduler = Scheduler::new(
            info,
            self.config.block_size.bytes() as usize,
            self.config.max_hash_failures,
        );
        let (progress_tx, mut progress_rx) = watch::channel(scheduler.remaining_pieces());
        let swarm = Swarm {
            config: Arc::clone(&self.config),
            info_hash: info.info_hash,
            total_pieces,
            scheduler: Arc::new(Mutex::new(scheduler)),
            work: Arc::new(watch::channel(0).0),
            progress: Arc::new(progress_tx),
            storage_tx: self.storage_tx.clone(),
            notifications_tx: self.notifications_tx.clone(),
        };

        // Cancelling the caller's token reaches every connection through this one
        let connections_token = cancel.child_token();
        let mut connections: JoinSet<(SocketAddr, Result<(), PeerError>)> = JoinSet::new();
        let mut active: HashSet<SocketAddr> = HashSet::new();
        // Peers that sent the wrong info hash or too many corrupt pieces
        let mut blocked: HashSet<SocketAddr> = HashSet::new();
        let mut seen: HashSet<SocketAddr> = HashSet::new();
        let mut announces = Announces::new(&self.config, total_pieces);
        let mut update_stats = interval(self.config.update_stats_interval);

        info!(
            "downloading {} ({} pieces, {})",
            info.name(),
            total_pieces,
            Size::from_bytes(info.total_size())
        );

        let outcome = loop {
            if *progress_rx.borrow_and_update() == 0 {
                break Outcome::Complete;
            }
            tokio::select! {
                _ = cancel.cancelled() => break Outcome::Aborted,
                Ok(()) = progress_rx.changed() => (),
                Some(joined) = connections.join_next() => {
                    match joined {
                        Ok((addr, result)) => {
                            active.remove(&addr);
                            match result {
                                Err(err) if err.is_permanent() => {
                                    info!("[{}] won't reconnect: {}", addr, err);
                                    blocked.insert(addr);
                                }
                                Err(err) => debug!("[{}] dropped: {}", addr, err),
                                Ok(()) => (),
                            }
                        }
                        Err(err) => warn!("connection task failed: {}", err),
                    }
                    if connections.is_empty() {
                        announces.peers_exhausted();
                    }
                }
                _ = sleep_until(announces.next) => {
                    let (remaining, sessions) = {
                        let scheduler = swarm.scheduler.lock().await;
                        (scheduler.remaining_pieces(), scheduler.sessions())
                    };
                    announces.progress(remaining, sessions);
                    if connections.is_empty() {
                        if announces.attempts >= self.config.max_announce_attempts {
                            break Outcome::Incomplete(remaining);
                        }
                        announces.attempts += 1;
                    }
                    announces.last = Instant::now();
                    let event = announces.event;
                    match self.announce(&swarm, event, announces.tracker_id.clone()).await {
                        Ok(result) => {
                            info!("tracker returned {} peers", result.peers.len());
                            announces.succeeded(&result);
                            for addr in result.peers {
                                if active.len() >= self.config.max_peers {
                                    break;
                                }
                                if blocked.contains(&addr) || !active.insert(addr) {
                                    continue;
                                }
                                seen.insert(addr);
                                let connection = Connection::new(addr, swarm.clone());
                                let token = connections_token.child_token();
                                connections.spawn(async move { (addr, connection.run(token).await) });
                            }
                            announces.next = if connections.is_empty() {
                                announces.last + announces.retry_interval
                            } else {
                                announces.last + announces.interval
                            };
                        }
                        Err(err) => {
                            warn!("announce failed: {}", err);
                            announces.next = announces.last + announces.retry_interval;
                        }
                    }
                }
                _ = update_stats.tick() => {
                    let stats = {
                        let scheduler = swarm.scheduler.lock().await;
                        Stats {
                            connected_peers: scheduler.connected_peers(),
                            downloaded: Size::from_bytes(scheduler.downloaded()),
                            remaining_pieces: scheduler.remaining_pieces(),
                            total_pieces,
                        }
                    };
                    let _ = self.notifications_tx.try_send(Notification::Stats(stats));
                }
            }
        };

        connections_token.cancel();
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                warn!("connection task failed: {}", err);
            }
        }

        match outcome {
            Outcome::Complete => {
                if announces.event.is_none() {
                    self.announce_quietly(&swarm, Event::Completed).await;
                }
                let downloaded = Size::from_bytes(swarm.scheduler.lock().await.downloaded());
                let _ = self.notifications_tx.try_send(Notification::DownloadComplete);
                info!("download complete in {:?}", start.elapsed());
                Ok(Summary {
                    pieces: total_pieces,
                    downloaded,
                    peers: seen.len(),
                    elapsed: start.elapsed(),
                })
            }
            Outcome::Incomplete(remaining) => {
                self.announce_quietly(&swarm, Event::Stopped).await;
                Err(DownloadError::Incomplete { remaining })
            }
            Outcome::Aborted => {
                if announces.event.is_none() {
                    self.announce_quietly(&swarm, Event::Stopped).await;
                }
                Err(DownloadError::Aborted)
            }
        }
    }

    async fn announce(
        &self,
        swarm: &Swarm,
        event: Option<Event>,
        tracker_id: Option<String>,
    ) -> Result<AnnounceResult, TrackerError> {
        let downloaded = swarm.scheduler.lock().await.downloaded();
        let request = TrackerRequest {
            announce: self.torrent.announce.clone(),
            info_hash: self.torrent.info.info_hash,
            peer_id: self.config.client_id,
            port: self.config.port,
            uploaded: Size::from_bytes(0),
            downloaded: Size::from_bytes(downloaded),
            left: Size::from_bytes(self.torrent.info.total_size() - downloaded),
            event,
            tracker_id,
        };
        self.tracker.announce(&request).await
    }

    async fn announce_quietly(&self, swarm: &Swarm, event: Event) {
        if let Err(err) = self.announce(swarm, Some(event), None).await {
            warn!("failed to announce {:?}: {}", event, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::net::TcpListener;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::crypto::Sha1;
    use crate::peer::seeder::Seeder;
    use crate::torrent::{DownloadType, Info};

    use super::*;

    const PIECE_SIZE: usize = 32 * 1024;

    fn content(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn torrent(server: &MockServer, content: &[u8]) -> Torrent {
        torrent_with_piece_size(server, content, PIECE_SIZE)
    }

    fn torrent_with_piece_size(server: &MockServer, content: &[u8], piece_size: usize) -> Torrent {
        Torrent {
            announce: Url::parse(&format!("{}/announce", server.uri())).unwrap(),
            info: Info {
                info_hash: Sha1::digest(b"client test"),
                piece_size,
                pieces: content.chunks(piece_size).map(Sha1::digest).collect(),
                download_type: DownloadType::SingleFile {
                    name: "client-test".to_string(),
                    size: content.len(),
                    md5sum: None,
                },
            },
            comment: None,
            created_by: None,
            creation_date: None,
            url_list: vec![],
        }
    }

    fn compact(peers: &[SocketAddr]) -> Vec<u8> {
        compact_with_interval(peers, 1800)
    }

    fn compact_with_interval(peers: &[SocketAddr], interval: u64) -> Vec<u8> {
        let mut entries = Vec::new();
        for peer in peers {
            if let SocketAddr::V4(v4) = peer {
                entries.extend_from_slice(&v4.ip().octets());
                entries.extend_from_slice(&v4.port().to_be_bytes());
            }
        }
        let mut body = format!("d8:intervali{}e5:peers{}:", interval, entries.len()).into_bytes();
        body.extend(entries);
        body.push(b'e');
        body
    }

    async fn tracker_with_peers(peers: &[SocketAddr]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/announce"))
            .and(query_param("event", "completed"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(compact(&[]), "text/plain"))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/announce"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(compact(peers), "text/plain"))
            .mount(&server)
            .await;
        server
    }

    fn client(
        torrent: Torrent,
        config: Config,
    ) -> (
        Client,
        mpsc::Receiver<VerifiedPiece>,
        mpsc::Receiver<Notification>,
    ) {
        let (storage_tx, storage_rx) = mpsc::channel(16);
        let (notifications_tx, notifications_rx) = mpsc::channel(256);
        let client = Client::new(torrent, config, storage_tx, notifications_tx).unwrap();
        (client, storage_rx, notifications_rx)
    }

    async fn drain(mut storage_rx: mpsc::Receiver<VerifiedPiece>) -> Vec<VerifiedPiece> {
        let mut pieces = Vec::new();
        while let Some(piece) = storage_rx.recv().await {
            pieces.push(piece);
        }
        pieces.sort_by_key(|piece| piece.index);
        pieces
    }

    #[tokio::test]
    async fn downloads_from_tracker_peers() {
        let content = content(PIECE_SIZE * 2 + 1000);
        let info_hash = Sha1::digest(b"client test");
        let seeder = Seeder::new(info_hash, content.clone(), PIECE_SIZE)
            .spawn()
            .await;
        let server = tracker_with_peers(&[seeder]).await;
        let (client, storage_rx, mut notifications_rx) =
            client(torrent(&server, &content), Config::new());

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            client.download(CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.pieces, 3);
        assert_eq!(summary.downloaded, Size::from_bytes(content.len()));
        assert_eq!(summary.peers, 1);

        let pieces = drain(storage_rx).await;
        assert_eq!(pieces.len(), 3);
        let joined: Vec<u8> = pieces.into_iter().flat_map(|piece| piece.data).collect();
        assert_eq!(joined, content);

        let mut completed = 0;
        let mut done = false;
        while let Ok(notification) = notifications_rx.try_recv() {
            match notification {
                Notification::PieceCompleted(_) => completed += 1,
                Notification::DownloadComplete => done = true,
                _ => (),
            }
        }
        assert_eq!(completed, 3);
        assert!(done);
    }

    #[tokio::test]
    async fn unreachable_peer_does_not_stop_download() {
        let content = content(PIECE_SIZE);
        let info_hash = Sha1::digest(b"client test");
        let seeder = Seeder::new(info_hash, content.clone(), PIECE_SIZE)
            .spawn()
            .await;
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let server = tracker_with_peers(&[dead, seeder]).await;
        let config = Config::new().with_connect_timeout(Duration::from_millis(500));
        let (client, storage_rx, _notifications_rx) = client(torrent(&server, &content), config);

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            client.download(CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.peers, 2);
        let pieces = drain(storage_rx).await;
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].data, content);
    }

    #[tokio::test]
    async fn gives_up_without_peers() {
        let content = content(PIECE_SIZE);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/announce"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(compact(&[]), "text/plain"))
            .mount(&server)
            .await;
        let config = Config::new()
            .with_max_announce_attempts(3)
            .with_announce_retry_interval(Duration::from_millis(10));
        let (client, _storage_rx, _notifications_rx) = client(torrent(&server, &content), config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.download(CancellationToken::new()),
        )
        .await
        .unwrap();

        assert_eq!(result, Err(DownloadError::Incomplete { remaining: 1 }));
        let requests = server.received_requests().await.unwrap();
        // three announces and the final `stopped`
        assert_eq!(requests.len(), 4);
    }

    #[tokio::test]
    async fn tracker_failures_count_as_attempts() {
        let content = content(PIECE_SIZE);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let config = Config::new()
            .with_max_announce_attempts(2)
            .with_announce_retry_interval(Duration::from_millis(10));
        let (client, _storage_rx, _notifications_rx) = client(torrent(&server, &content), config);

        let result = client.download(CancellationToken::new()).await;

        assert_eq!(result, Err(DownloadError::Incomplete { remaining: 1 }));
    }

    #[tokio::test]
    async fn cancel_aborts_download() {
        let content = content(PIECE_SIZE);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(compact(&[]), "text/plain"))
            .mount(&server)
            .await;
        let (client, _storage_rx, _notifications_rx) =
            client(torrent(&server, &content), Config::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), client.download(cancel))
            .await
            .unwrap();

        assert_eq!(result, Err(DownloadError::Aborted));
    }

    #[tokio::test]
    async fn single_piece_single_block() {
        let content = content(16384);
        let info_hash = Sha1::digest(b"client test");
        let seeder = Seeder::new(info_hash, content.clone(), 16384);
        let served = Arc::clone(&seeder.served);
        let addr = seeder.spawn().await;
        let server = tracker_with_peers(&[addr]).await;
        let torrent = torrent_with_piece_size(&server, &content, 16384);
        let (client, mut storage_rx, mut notifications_rx) = client(torrent, Config::new());

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            client.download(CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.pieces, 1);
        assert_eq!(summary.downloaded, Size::from_bytes(16384));
        assert_eq!(served.load(Ordering::SeqCst), 1);
        let piece = storage_rx.recv().await.unwrap();
        assert_eq!(piece.index, 0);
        assert_eq!(piece.data, content);
        assert!(storage_rx.recv().await.is_none());
        let mut completed = Vec::new();
        let mut done = false;
        while let Ok(notification) = notifications_rx.try_recv() {
            match notification {
                Notification::PieceCompleted(piece) => completed.push(piece),
                Notification::DownloadComplete => done = true,
                _ => (),
            }
        }
        assert_eq!(completed, vec![0]);
        assert!(done);
    }

    #[tokio::test]
    async fn choking_peer_keeps_download_alive() {
        let content = content(PIECE_SIZE);
        let info_hash = Sha1::digest(b"client test");
        let mut seeder = Seeder::new(info_hash, content.clone(), PIECE_SIZE);
        seeder.choke_after = Some(0);
        let accepted = Arc::clone(&seeder.accepted);
        let addr = seeder.spawn().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/announce"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(compact_with_interval(&[addr], 0), "text/plain"),
            )
            .mount(&server)
            .await;
        let config = Config::new()
            .with_max_announce_attempts(3)
            .with_announce_retry_interval(Duration::from_millis(20));
        let (client, _storage_rx, _notifications_rx) = client(torrent(&server, &content), config);

        let result = tokio::time::timeout(
            Duration::from_millis(600),
            client.download(CancellationToken::new()),
        )
        .await;

        assert!(result.is_err(), "download ended early: {:?}", result);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        let announces = server.received_requests().await.unwrap().len();
        // a zero interval is raised to the retry interval
        assert!(announces > 3 && announces <= 40, "{} announces", announces);
    }

    #[tokio::test]
    async fn peer_with_wrong_info_hash_is_not_redialed() {
        let content = content(PIECE_SIZE);
        let seeder = Seeder::new(Sha1::digest(b"other torrent"), content.clone(), PIECE_SIZE);
        let accepted = Arc::clone(&seeder.accepted);
        let addr = seeder.spawn().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/announce"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(compact(&[addr]), "text/plain"))
            .mount(&server)
            .await;
        let config = Config::new()
            .with_max_announce_attempts(3)
            .with_announce_retry_interval(Duration::from_millis(10));
        let (client, _storage_rx, _notifications_rx) = client(torrent(&server, &content), config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.download(CancellationToken::new()),
        )
        .await
        .unwrap();

        assert_eq!(result, Err(DownloadError::Incomplete { remaining: 1 }));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
