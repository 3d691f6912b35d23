use super::{Bitfield, BlockInfo, PeerConnection, PeerMessage};
use crate::error::{Result, TorgetError};
use crate::piece::{PieceScheduler, ReleaseOutcome, VerifiedPiece, BLOCK_SIZE};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Outstanding block requests kept on the wire at once.
const MAX_PIPELINED_REQUESTS: usize = 5;

/// The per-peer download state machine.
///
/// A session owns its connection exclusively; the only shared state it
/// touches is the scheduler behind its mutex and the verified-piece
/// channel. It never sees other sessions.
pub struct PeerSession {
    conn: PeerConnection,
    scheduler: Arc<Mutex<PieceScheduler>>,
    verified_tx: mpsc::Sender<VerifiedPiece>,
    num_pieces: usize,
    choked: bool,
    bitfield: Option<Bitfield>,
}

impl PeerSession {
    pub fn new(
        conn: PeerConnection,
        scheduler: Arc<Mutex<PieceScheduler>>,
        verified_tx: mpsc::Sender<VerifiedPiece>,
        num_pieces: usize,
    ) -> Self {
        Self {
            conn,
            scheduler,
            verified_tx,
            num_pieces,
            choked: true,
            bitfield: None,
        }
    }

    /// Drive the session: declare interest, wait for bitfield and unchoke,
    /// then fetch pieces until none remain for this peer.
    ///
    /// Any I/O failure, protocol violation, or hash mismatch ends the
    /// session with an error; a drained scheduler ends it cleanly.
    pub async fn run(mut self) -> Result<()> {
        let addr = self.conn.addr();

        self.conn.send_message(&PeerMessage::Interested).await?;

        while self.choked || self.bitfield.is_none() {
            let message = self.conn.receive_message().await?;
            self.handle_control(message)?;
        }

        loop {
            let assigned = {
                let mut scheduler = self.scheduler.lock().await;
                // The loop above guarantees the bitfield is present.
                match &self.bitfield {
                    Some(bitfield) => scheduler.try_assign(bitfield),
                    None => None,
                }
            };

            let Some(index) = assigned else {
                debug!("Peer {}: no assignable piece remains, leaving", addr);
                return Ok(());
            };

            match self.download_piece(index).await {
                Ok(Some(data)) => {
                    self.scheduler
                        .lock()
                        .await
                        .release(index, ReleaseOutcome::Verified);
                    info!("Peer {}: piece {} verified ({} bytes)", addr, index, data.len());

                    // A closed channel means the writer is done; nothing
                    // left for this session to do.
                    if self
                        .verified_tx
                        .send(VerifiedPiece { index, data })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    // Choked mid-piece; the piece went back to the pool.
                    // Wait to be unchoked before asking for more work.
                    while self.choked {
                        let message = self.conn.receive_message().await?;
                        self.handle_control(message)?;
                    }
                }
                Err(err) => {
                    self.scheduler
                        .lock()
                        .await
                        .release(index, ReleaseOutcome::Failed);
                    warn!("Peer {}: piece {} failed: {}", addr, index, err);
                    return Err(err);
                }
            }
        }
    }

    /// Fetch and verify one piece. `Ok(None)` means the peer choked us and
    /// the piece has been returned to the pool.
    async fn download_piece(&mut self, index: usize) -> Result<Option<Vec<u8>>> {
        let (piece_length, expected_hash) = {
            let scheduler = self.scheduler.lock().await;
            (
                scheduler.piece_length_at(index),
                *scheduler.hash(index).as_bytes(),
            )
        };

        let mut data: Vec<u8> = Vec::with_capacity(piece_length as usize);
        let mut requested: u64 = 0;
        let mut in_flight: usize = 0;

        while (data.len() as u64) < piece_length {
            if self.choked {
                self.scheduler
                    .lock()
                    .await
                    .release(index, ReleaseOutcome::Failed);
                debug!(
                    "Peer {}: choked at {}/{} bytes of piece {}",
                    self.conn.addr(),
                    data.len(),
                    piece_length,
                    index
                );
                return Ok(None);
            }

            while in_flight < MAX_PIPELINED_REQUESTS && requested < piece_length {
                let length = (piece_length - requested).min(BLOCK_SIZE as u64) as u32;
                let block = BlockInfo::new(index as u32, requested as u32, length);
                self.conn
                    .send_message(&PeerMessage::Request { block })
                    .await?;
                requested += length as u64;
                in_flight += 1;
            }

            let message = self.conn.receive_message().await?;
            match message {
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: block,
                } => {
                    in_flight = in_flight.saturating_sub(1);

                    let expected_offset = data.len();
                    if piece_index as usize == index
                        && offset as usize == expected_offset
                        && expected_offset + block.len() <= piece_length as usize
                    {
                        data.extend_from_slice(&block);
                    } else {
                        // Not the block we are waiting for; drop it and
                        // request again from the current offset.
                        debug!(
                            "Peer {}: discarding block {}+{} while at {}+{}",
                            self.conn.addr(),
                            piece_index,
                            offset,
                            index,
                            expected_offset
                        );
                        requested = data.len() as u64;
                        in_flight = 0;
                    }
                }
                other => self.handle_control(other)?,
            }
        }

        let digest: [u8; 20] = Sha1::digest(&data).into();
        if digest != expected_hash {
            return Err(TorgetError::PieceError(format!(
                "Piece {} hash mismatch",
                index
            )));
        }

        Ok(Some(data))
    }

    /// Apply a non-Piece message to the session state.
    fn handle_control(&mut self, message: PeerMessage) -> Result<()> {
        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => self.choked = true,
            PeerMessage::Unchoke => self.choked = false,
            PeerMessage::Bitfield { bitfield } => {
                self.bitfield = Some(Bitfield::from_payload(bitfield, self.num_pieces)?);
            }
            PeerMessage::Have { piece_index } => {
                self.bitfield
                    .get_or_insert_with(|| Bitfield::empty(self.num_pieces))
                    .set(piece_index as usize)?;
            }
            // We are strictly a leecher: remote interest and requests are
            // noted and never served.
            PeerMessage::Interested | PeerMessage::NotInterested => {}
            PeerMessage::Request { .. } | PeerMessage::Cancel { .. } => {}
            // A block outside an active download; ignore it.
            PeerMessage::Piece { piece_index, .. } => {
                debug!(
                    "Peer {}: unsolicited block for piece {}",
                    self.conn.addr(),
                    piece_index
                );
            }
        }

        Ok(())
    }
}
