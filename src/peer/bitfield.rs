use crate::error::{Result, TorgetError};

/// Packed big-endian bit array, one bit per piece.
///
/// Bit `i` lives at byte `i / 8`, bit `7 - (i % 8)`; a set bit means the
/// remote has the piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
    num_pieces: usize,
}

impl Bitfield {
    /// Number of bytes a bitfield for `num_pieces` pieces occupies.
    pub fn expected_len(num_pieces: usize) -> usize {
        num_pieces.div_ceil(8)
    }

    /// An all-zero bitfield, used when `Have` arrives before `Bitfield`.
    pub fn empty(num_pieces: usize) -> Self {
        Self {
            bytes: vec![0u8; Self::expected_len(num_pieces)],
            num_pieces,
        }
    }

    /// A bitfield with every piece set (scripting a full seeder).
    pub fn full(num_pieces: usize) -> Self {
        let mut bitfield = Self::empty(num_pieces);
        for index in 0..num_pieces {
            bitfield.bytes[index / 8] |= 1 << (7 - (index % 8));
        }
        bitfield
    }

    /// Wrap a received `Bitfield` payload. The length must be exactly
    /// `ceil(num_pieces / 8)`; bits beyond `num_pieces` are ignored.
    pub fn from_payload(payload: Vec<u8>, num_pieces: usize) -> Result<Self> {
        if payload.len() != Self::expected_len(num_pieces) {
            return Err(TorgetError::PeerError(format!(
                "Bitfield length {} does not match {} pieces",
                payload.len(),
                num_pieces
            )));
        }

        Ok(Self {
            bytes: payload,
            num_pieces,
        })
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.num_pieces {
            return false;
        }
        (self.bytes[index / 8] >> (7 - (index % 8))) & 1 == 1
    }

    /// Set bit `index`, as for a `Have` message.
    pub fn set(&mut self, index: usize) -> Result<()> {
        if index >= self.num_pieces {
            return Err(TorgetError::PeerError(format!(
                "Have index {} out of range ({} pieces)",
                index, self.num_pieces
            )));
        }
        self.bytes[index / 8] |= 1 << (7 - (index % 8));
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
