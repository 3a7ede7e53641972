use thiserror::Error;

use crate::bencoding::{ParseError, SchemaError};

#[derive(Debug, Error)]
pub enum InvalidTorrent {
    #[error("malformed bencode: {0}")]
    Parse(#[from] ParseError),

    #[error("invalid metainfo: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid announce url: {0}")]
    Announce(#[from] url::ParseError),

    #[error("invalid pieces length {0}, must be a multiple of 20")]
    PiecesLength(usize),

    #[error("expected {expected} piece hashes, found {found}")]
    PieceCount { expected: usize, found: usize },

    #[error("piece length must be positive")]
    ZeroPieceLength,

    #[error("info must contain either length or files")]
    MissingLength,

    #[error("unable to read torrent file: {0}")]
    Io(#[from] std::io::Error),
}
