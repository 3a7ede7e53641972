mod download_type;
mod error;
mod info;

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use url::Url;

use crate::bencoding::Value;

pub use download_type::*;
pub use error::InvalidTorrent;
pub use info::Info;

// https://wiki.theory.org/BitTorrentSpecification#Metainfo_File_Structure

#[derive(Debug, PartialEq, Clone)]
pub struct Torrent {
    pub announce: Url,
    pub info: Info,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    /// Seconds since the epoch, may be negative.
    pub creation_date: Option<i64>,
    /// Web seed urls (BEP 19), either a single string or a list in the file.
    pub url_list: Vec<String>,
}

impl Torrent {
    pub fn load(bytes: &[u8]) -> Result<Self, InvalidTorrent> {
        let value = Value::decode(bytes)?;
        Torrent::try_from(value)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, InvalidTorrent> {
        let bytes = tokio::fs::read(path).await?;
        Torrent::load(&bytes)
    }

    pub fn to_value(&self) -> Value {
        let mut value = Value::dictionary()
            .with_entry("announce", Value::string(self.announce.as_str()))
            .with_entry("info", Value::from(&self.info));
        if let Some(comment) = &self.comment {
            value = value.with_entry("comment", Value::string(comment));
        }
        if let Some(created_by) = &self.created_by {
            value = value.with_entry("created by", Value::string(created_by));
        }
        if let Some(creation_date) = self.creation_date {
            value = value.with_entry("creation date", Value::Integer(creation_date));
        }
        if !self.url_list.is_empty() {
            value = value.with_entry("url-list", Value::from(self.url_list.as_slice()));
        }
        value
    }
}

impl TryFrom<Value> for Torrent {
    type Error = InvalidTorrent;

    fn try_from(mut value: Value) -> Result<Self, Self::Error> {
        let announce: String = value.field("announce")?;
        let announce = Url::parse(&announce)?;
        let info = Info::try_from(value.remove_entry("info")?)?;
        let comment = value.optional_field("comment")?;
        let created_by = value.optional_field("created by")?;
        let creation_date = value.optional_field("creation date")?;
        let url_list = match value.try_remove_entry("url-list")? {
            Some(Value::String(url)) => vec![String::try_from(Value::String(url))?],
            Some(list) => list.try_into()?,
            None => Vec::new(),
        };
        Ok(Torrent {
            announce,
            info,
            comment,
            created_by,
            creation_date,
            url_list,
        })
    }
}

/// Piece hashes listed by the `Display` impl before the rest is elided.
const LISTED_PIECE_HASHES: usize = 4;

impl Display for Torrent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.info.name())?;
        writeln!(f, "Tracker URL: {}", self.announce)?;
        writeln!(f, "Length: {}", self.info.total_size())?;
        writeln!(f, "Info Hash: {}", self.info.info_hash)?;
        writeln!(f, "Piece Length: {}", self.info.piece_size)?;
        write!(f, "Piece Hashes:")?;
        for hash in self.info.pieces.iter().take(LISTED_PIECE_HASHES) {
            write!(f, "\n{}", hash)?;
        }
        if self.info.pieces.len() > LISTED_PIECE_HASHES {
            write!(
                f,
                "\n... ({} more)",
                self.info.pieces.len() - LISTED_PIECE_HASHES
            )?;
        }
        Ok(())
    }
}
