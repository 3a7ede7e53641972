use crate::bencoding::Value;
use crate::crypto::{SHA1_LEN, Sha1};
use crate::torrent::{DownloadType, InvalidTorrent};

#[derive(Debug, PartialEq, Clone)]
pub struct Info {
    /// SHA-1 of the canonical encoding of the whole `info` dictionary, unknown keys included.
    pub info_hash: Sha1,
    pub piece_size: usize,
    pub pieces: Vec<Sha1>,
    pub download_type: DownloadType,
}

impl Info {
    fn build_pieces(pieces: &[u8]) -> Result<Vec<Sha1>, InvalidTorrent> {
        if pieces.len() % SHA1_LEN != 0 {
            return Err(InvalidTorrent::PiecesLength(pieces.len()));
        }
        let all = pieces
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut bytes = [0; SHA1_LEN];
                bytes.copy_from_slice(chunk);
                Sha1(bytes)
            })
            .collect();
        Ok(all)
    }

    pub fn name(&self) -> &str {
        self.download_type.name()
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece_size(&self, piece: usize) -> usize {
        let piece_start = self.piece_offset(piece);
        let piece_end = (piece_start + self.piece_size).min(self.total_size());
        piece_end - piece_start
    }

    pub fn piece_offset(&self, piece: usize) -> usize {
        self.piece_size * piece
    }

    pub fn total_size(&self) -> usize {
        self.download_type.total_size()
    }
}

impl TryFrom<Value> for Info {
    type Error = InvalidTorrent;

    fn try_from(mut value: Value) -> Result<Self, Self::Error> {
        let info_hash = Sha1::digest(&value.to_bytes());
        let piece_size: usize = value.field("piece length")?;
        if piece_size == 0 {
            return Err(InvalidTorrent::ZeroPieceLength);
        }
        let pieces: Vec<u8> = value.field("pieces")?;
        let pieces = Info::build_pieces(&pieces)?;
        let download_type = DownloadType::try_from(value)?;
        let expected = download_type.total_size().div_ceil(piece_size);
        if pieces.len() != expected {
            return Err(InvalidTorrent::PieceCount {
                expected,
                found: pieces.len(),
            });
        }
        Ok(Info {
            info_hash,
            piece_size,
            pieces,
            download_type,
        })
    }
}

impl From<&Info> for Value {
    fn from(info: &Info) -> Self {
        let pieces: Vec<u8> = info.pieces.iter().flat_map(|sha1| sha1.0).collect();
        let value = Value::dictionary()
            .with_entry("piece length", Value::from(info.piece_size))
            .with_entry("pieces", Value::String(pieces));
        info.download_type.write_entries(value)
    }
}
