use std::net::SocketAddr;

use size::Size;

/// Progress reports sent while a download runs. Delivery is best effort: when the receiver falls
/// behind, notifications are dropped rather than stalling the download.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
    PieceCompleted(usize),
    PieceCorrupted(usize),
    Stats(Stats),
    DownloadComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub connected_peers: usize,
    /// Verified bytes
    pub downloaded: Size,
    pub remaining_pieces: usize,
    pub total_pieces: usize,
}

impl Stats {
    pub fn completed(&self) -> f64 {
        let completed_pieces = self.total_pieces - self.remaining_pieces;
        100f64 * (completed_pieces as f64) / (self.total_pieces as f64)
    }
}
