use thiserror::Error;

use crate::crypto::Sha1;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake too short: {length} bytes, need {needed}")]
    Truncated { length: usize, needed: usize },

    #[error("unsupported protocol {0:?}")]
    Protocol(String),

    #[error("info hash mismatch: expected {expected}, got {actual}")]
    InfoHashMismatch { expected: Sha1, actual: Sha1 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A peer sent something that violates the wire protocol. The connection is dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message length {length} exceeds maximum of {max}")]
    MessageTooLong { length: usize, max: usize },

    #[error("invalid length {length} for message id {id}")]
    InvalidLength { id: u8, length: usize },

    #[error("bitfield of {found} bytes, expected {expected}")]
    BitfieldLength { expected: usize, found: usize },

    #[error("bitfield has spare bits set")]
    BitfieldSpareBits,

    #[error("piece index {0} out of range")]
    PieceOutOfRange(usize),

    #[error("unexpected block length {found} for piece {piece} offset {offset}")]
    BlockLength {
        piece: usize,
        offset: usize,
        found: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
