use std::io;

use thiserror::Error;

use crate::message::{HandshakeError, ProtocolError};

/// Why a connection was closed. Contained in the connection task, never fatal to the download.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to connect: {0}")]
    Dial(io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol violation: {0}")]
    Protocol(ProtocolError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("io error: {0}")]
    Io(io::Error),

    #[error("too many corrupt pieces ({0})")]
    HashFailures(usize),

    #[error("storage is gone")]
    StorageClosed,
}

impl PeerError {
    /// The peer can't serve this torrent, reconnecting to it is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PeerError::Handshake(HandshakeError::InfoHashMismatch { .. })
                | PeerError::Handshake(HandshakeError::Protocol(_))
                | PeerError::HashFailures(_)
        )
    }
}

impl From<ProtocolError> for PeerError {
    fn from(value: ProtocolError) -> Self {
        match value {
            ProtocolError::Io(err) => PeerError::Io(err),
            err => PeerError::Protocol(err),
        }
    }
}
