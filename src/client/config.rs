use std::time::Duration;

use size::Size;

use crate::core::PeerId;

/// Configuration settings for a download
#[derive(Clone, Debug)]
pub struct Config {
    // Identity and Network Settings
    /// Unique identifier for this client in the swarm
    pub client_id: PeerId,
    /// Port number reported to the tracker
    pub port: u16,

    // Scheduler Settings
    /// Maximum number of outstanding block requests per peer
    pub pipeline_depth: usize,
    /// Size of data blocks for piece transfers
    pub block_size: Size,
    /// Hash failures after which a peer is disconnected
    pub max_hash_failures: usize,

    // Swarm Settings
    /// Maximum number of concurrent peer connections
    pub max_peers: usize,
    /// Consecutive announces without progress before giving up
    pub max_announce_attempts: usize,
    /// Delay before announcing again after a tracker failure or when no peer is left, unless the
    /// tracker asked for a `min interval`
    pub announce_retry_interval: Duration,

    // Connection Settings
    /// Timeout for establishing new connections
    pub connect_timeout: Duration,
    /// Timeout for the handshake exchange
    pub handshake_timeout: Duration,
    /// Time without any message from the peer after which it is disconnected
    pub read_timeout: Duration,
    /// Timeout for writing a single message
    pub write_timeout: Duration,
    /// Time after which an outstanding request with no answer closes the connection
    pub request_timeout: Duration,
    /// Interval between keep-alive messages
    pub keep_alive_interval: Duration,
    /// Timeout for tracker requests
    pub tracker_timeout: Duration,

    // Event System Settings
    /// Interval between statistics updates
    pub update_stats_interval: Duration,
    /// Size of the notification and storage channel buffers
    pub channel_buffer: usize,
}

impl Config {
    pub fn with_client_id(mut self, client_id: PeerId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_pipeline_depth(mut self, n: usize) -> Self {
        self.pipeline_depth = n;
        self
    }

    pub fn with_block_size(mut self, size: Size) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_max_hash_failures(mut self, n: usize) -> Self {
        self.max_hash_failures = n;
        self
    }

    pub fn with_max_peers(mut self, n: usize) -> Self {
        self.max_peers = n;
        self
    }

    pub fn with_max_announce_attempts(mut self, n: usize) -> Self {
        self.max_announce_attempts = n;
        self
    }

    pub fn with_announce_retry_interval(mut self, interval: Duration) -> Self {
        self.announce_retry_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_tracker_timeout(mut self, timeout: Duration) -> Self {
        self.tracker_timeout = timeout;
        self
    }

    pub fn with_update_stats_interval(mut self, interval: Duration) -> Self {
        self.update_stats_interval = interval;
        self
    }

    /// Largest frame accepted from a peer: a full block plus the piece message header.
    pub fn max_message_length(&self) -> usize {
        self.block_size.bytes() as usize + 9
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        let keep_alive_interval = Duration::from_secs(120);
        Self {
            client_id: PeerId::random(),
            port: 6881,
            pipeline_depth: 5,
            block_size: Size::from_kibibytes(16),
            max_hash_failures: 3,
            max_peers: 50,
            max_announce_attempts: 5,
            announce_retry_interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            read_timeout: keep_alive_interval + Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keep_alive_interval,
            tracker_timeout: Duration::from_secs(10),
            update_stats_interval: Duration::from_secs(1),
            channel_buffer: 16,
        }
    }
}
