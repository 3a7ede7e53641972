use thiserror::Error;

use crate::bencoding::{ParseError, SchemaError};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker returned status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Parse(#[from] ParseError),

    #[error("unexpected response: {0}")]
    Schema(#[from] SchemaError),

    #[error("tracker failure: {0}")]
    Failure(String),

    #[error("peer list of {length} bytes is not a multiple of {entry}")]
    MalformedPeerList { length: usize, entry: usize },

    #[error("non-compact peer list is not supported")]
    UnsupportedPeerList,
}
