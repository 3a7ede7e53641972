use std::io::SeekFrom;
use std::path::Path;

use log::{debug, info};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc::Receiver;

use crate::storage::VerifiedPiece;

/// Writes verified pieces at `index * piece_size` into a single pre-sized file.
pub struct FileWriter {
    file: File,
    piece_size: usize,
}

impl FileWriter {
    pub async fn create(
        path: impl AsRef<Path>,
        total_size: usize,
        piece_size: usize,
    ) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await?;
        file.set_len(total_size as u64).await?;
        Ok(Self { file, piece_size })
    }

    pub async fn write(&mut self, piece: &VerifiedPiece) -> anyhow::Result<()> {
        let offset = (piece.index * self.piece_size) as u64;
        debug!("writing piece {} at offset {}", piece.index, offset);
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&piece.data).await?;
        Ok(())
    }

    /// Writes pieces until every sender is gone, returns how many were written.
    pub async fn run(mut self, mut rx: Receiver<VerifiedPiece>) -> anyhow::Result<usize> {
        let mut written = 0;
        while let Some(piece) = rx.recv().await {
            self.write(&piece).await?;
            written += 1;
        }
        self.file.flush().await?;
        self.file.sync_all().await?;
        info!("{} pieces written", written);
        Ok(written)
    }
}
