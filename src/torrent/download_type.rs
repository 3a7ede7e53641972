use std::path::PathBuf;

use crate::bencoding::{SchemaError, Value};
use crate::torrent::InvalidTorrent;

#[derive(Debug, PartialEq, Clone)]
pub enum DownloadType {
    SingleFile {
        name: String,
        size: usize,
        md5sum: Option<String>,
    },
    MultiFile {
        directory_name: String,
        files: Vec<File>,
    },
}

impl DownloadType {
    pub fn name(&self) -> &str {
        match self {
            Self::SingleFile { name, .. } => name,
            Self::MultiFile { directory_name, .. } => directory_name,
        }
    }

    pub fn total_size(&self) -> usize {
        match self {
            Self::SingleFile { size, .. } => *size,
            Self::MultiFile { files, .. } => files.iter().map(|file| file.size).sum(),
        }
    }

    /// Writes the fields this type owns into an `info` dictionary.
    pub fn write_entries(&self, info: Value) -> Value {
        match self {
            Self::SingleFile { name, size, md5sum } => {
                let info = info
                    .with_entry("name", Value::string(name))
                    .with_entry("length", Value::from(*size));
                match md5sum {
                    Some(md5sum) => info.with_entry("md5sum", Value::string(md5sum)),
                    None => info,
                }
            }
            Self::MultiFile {
                directory_name,
                files,
            } => {
                let files = files.iter().map(Value::from).collect::<Vec<_>>();
                info.with_entry("name", Value::string(directory_name))
                    .with_entry("files", Value::from(files))
            }
        }
    }
}

impl TryFrom<Value> for DownloadType {
    type Error = InvalidTorrent;

    fn try_from(mut value: Value) -> Result<Self, Self::Error> {
        let name = value.field("name")?;
        if let Some(size) = value.optional_field("length")? {
            let md5sum = value.optional_field("md5sum")?;
            return Ok(DownloadType::SingleFile { name, size, md5sum });
        }

        if let Some(files) = value.optional_field::<Vec<Value>>("files")? {
            let files = files
                .into_iter()
                .map(File::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| SchemaError::field("files", err))?;
            return Ok(DownloadType::MultiFile {
                directory_name: name,
                files,
            });
        }

        Err(InvalidTorrent::MissingLength)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct File {
    pub path: PathBuf,
    pub size: usize,
    pub md5sum: Option<String>,
}

impl TryFrom<Value> for File {
    type Error = SchemaError;

    fn try_from(mut value: Value) -> Result<Self, Self::Error> {
        let size = value.field("length")?;
        let parts: Vec<String> = value.field("path")?;
        let path = PathBuf::from_iter(parts);
        let md5sum = value.optional_field("md5sum")?;
        Ok(File { path, size, md5sum })
    }
}

impl From<&File> for Value {
    fn from(file: &File) -> Self {
        let path = file
            .path
            .iter()
            .map(|part| Value::string(&part.to_string_lossy()))
            .collect::<Vec<_>>();
        let value = Value::dictionary()
            .with_entry("length", Value::from(file.size))
            .with_entry("path", Value::from(path));
        match &file.md5sum {
            Some(md5sum) => value.with_entry("md5sum", Value::string(md5sum)),
            None => value,
        }
    }
}
