use crate::error::{Result, TorgetError};
use crate::piece::{PieceScheduler, ReleaseOutcome, VerifiedPiece};
use crate::torrent::TorrentInfo;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

struct FileEntry {
    path: PathBuf,
    length: u64,
    /// Start of this file in the flat torrent stream
    offset: u64,
    handle: File,
}

/// Owns the output files and writes verified pieces into them.
///
/// All file handles are opened up front, sized to their declared length,
/// and held until the manager is dropped. Nothing else touches the
/// filesystem for payload data.
pub struct StorageManager {
    files: Vec<FileEntry>,
    total_length: u64,
    piece_length: u64,
}

impl StorageManager {
    /// Create every output file under `download_dir`: single-file mode
    /// writes `<dir>/<name>`, multi-file mode `<dir>/<name>/<path...>`.
    /// Parent directories are created as needed; files are opened
    /// read-write (mode 0644) and sized to their declared length.
    pub async fn new<P: AsRef<Path>>(download_dir: P, info: &TorrentInfo) -> Result<Self> {
        let base = if info.multi_file {
            download_dir.as_ref().join(&info.name)
        } else {
            download_dir.as_ref().to_path_buf()
        };

        fs::create_dir_all(&base).await?;

        let mut files = Vec::with_capacity(info.files.len());
        let mut offset = 0u64;

        for file_info in &info.files {
            let mut path = base.clone();
            for component in &file_info.path {
                path.push(component);
            }

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }

            let mut options = OpenOptions::new();
            options.create(true).read(true).write(true);
            #[cfg(unix)]
            options.mode(0o644);

            let handle = options.open(&path).await?;
            handle.set_len(file_info.length).await?;

            debug!("Opened {:?} ({} bytes at offset {})", path, file_info.length, offset);

            files.push(FileEntry {
                path,
                length: file_info.length,
                offset,
                handle,
            });

            offset += file_info.length;
        }

        info!(
            "Storage initialized: {} files, {} bytes total",
            files.len(),
            info.total_length
        );

        Ok(Self {
            files,
            total_length: info.total_length,
            piece_length: info.piece_length,
        })
    }

    /// Write one piece at its absolute position, splitting it across every
    /// file whose range intersects `[index * piece_length, ..+len)`.
    pub async fn write_piece(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let piece_start = (index as u64) * self.piece_length;
        let piece_end = piece_start + data.len() as u64;

        if piece_end > self.total_length {
            return Err(TorgetError::StorageError(format!(
                "Piece {} overruns the payload ({} > {})",
                index, piece_end, self.total_length
            )));
        }

        for entry in &mut self.files {
            let file_start = entry.offset;
            let file_end = entry.offset + entry.length;

            let start = piece_start.max(file_start);
            let end = piece_end.min(file_end);
            if start >= end {
                continue;
            }

            let chunk = &data[(start - piece_start) as usize..(end - piece_start) as usize];

            entry
                .handle
                .seek(std::io::SeekFrom::Start(start - file_start))
                .await?;
            entry.handle.write_all(chunk).await?;

            debug!(
                "Wrote {} bytes of piece {} to {:?} at offset {}",
                chunk.len(),
                index,
                entry.path,
                start - file_start
            );
        }

        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        for entry in &mut self.files {
            entry.handle.flush().await?;
        }
        Ok(())
    }

    fn num_pieces(&self) -> usize {
        self.total_length.div_ceil(self.piece_length) as usize
    }

    /// The writer task: consume verified pieces until every piece has been
    /// written once. Duplicate deliveries of a piece are ignored.
    ///
    /// A write error returns the piece to the pool and aborts the
    /// download; a closed channel with pieces still missing means the
    /// session pool drained without finishing.
    pub async fn run(
        mut self,
        mut verified_rx: mpsc::Receiver<VerifiedPiece>,
        scheduler: Arc<Mutex<PieceScheduler>>,
    ) -> Result<()> {
        let num_pieces = self.num_pieces();
        let mut written = vec![false; num_pieces];
        let mut written_count = 0usize;

        while let Some(piece) = verified_rx.recv().await {
            if piece.index >= num_pieces || written[piece.index] {
                debug!("Piece {} already written, skipping", piece.index);
                continue;
            }

            if let Err(err) = self.write_piece(piece.index, &piece.data).await {
                scheduler
                    .lock()
                    .await
                    .release(piece.index, ReleaseOutcome::Failed);
                return Err(err);
            }

            written[piece.index] = true;
            written_count += 1;

            info!(
                "Piece {} written ({}/{}, {:.1}%)",
                piece.index,
                written_count,
                num_pieces,
                written_count as f64 * 100.0 / num_pieces as f64
            );

            if written_count == num_pieces {
                self.flush().await?;
                info!("All {} pieces written", num_pieces);
                return Ok(());
            }
        }

        Err(TorgetError::DownloadIncomplete(written_count, num_pieces))
    }
}
