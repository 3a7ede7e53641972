/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Handshaked,
    /// At least one message was received after the handshake.
    Active,
    Closed,
}

/// Our interest and the peer's choke. We never unchoke anyone, so the other two flags of the
/// protocol don't affect us.
/// Connections start out choked and not interested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub am_interested: bool,
    pub peer_choking: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            am_interested: false,
            peer_choking: true,
        }
    }
}

impl Flags {
    /// Requests may only be sent to a peer that unchoked us while we're interested.
    pub fn can_request(&self) -> bool {
        self.am_interested && !self.peer_choking
    }
}
