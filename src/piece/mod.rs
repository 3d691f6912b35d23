mod scheduler;

pub use scheduler::{PieceScheduler, ReleaseOutcome};

/// Standard block size (16 KiB), the on-wire request unit.
pub const BLOCK_SIZE: u32 = 1 << 14;

/// State of a piece in the shared pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    /// Not downloaded yet
    Missing,
    /// Assigned to exactly one peer session
    Downloading,
    /// Downloaded and hash-verified; terminal
    Complete,
}

/// A hash-verified piece on its way to the writer.
#[derive(Debug, Clone)]
pub struct VerifiedPiece {
    pub index: usize,
    pub data: Vec<u8>,
}
