use crate::error::{Result, TorgetError};
use bytes::{Buf, BufMut, BytesMut};

/// Maximum accepted message length; anything larger ends the session.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// One block of a piece, the unit of an on-wire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Messages of the peer wire protocol (BEP-3 ids 0-8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Zero-length frame
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { block: BlockInfo },
    Piece {
        piece_index: u32,
        offset: u32,
        data: Vec<u8>,
    },
    Cancel { block: BlockInfo },
}

impl PeerMessage {
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;

    /// Serialize with the length prefix: `<length u32 BE><id><payload>`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        match self {
            PeerMessage::KeepAlive => {
                buf.put_u32(0);
            }
            PeerMessage::Choke => {
                buf.put_u32(1);
                buf.put_u8(Self::CHOKE);
            }
            PeerMessage::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(Self::UNCHOKE);
            }
            PeerMessage::Interested => {
                buf.put_u32(1);
                buf.put_u8(Self::INTERESTED);
            }
            PeerMessage::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(Self::NOT_INTERESTED);
            }
            PeerMessage::Have { piece_index } => {
                buf.put_u32(5);
                buf.put_u8(Self::HAVE);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_u32((1 + bitfield.len()) as u32);
                buf.put_u8(Self::BITFIELD);
                buf.put_slice(bitfield);
            }
            PeerMessage::Request { block } => {
                buf.put_u32(13);
                buf.put_u8(Self::REQUEST);
                buf.put_u32(block.piece_index);
                buf.put_u32(block.offset);
                buf.put_u32(block.length);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32((9 + data.len()) as u32);
                buf.put_u8(Self::PIECE);
                buf.put_u32(*piece_index);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            PeerMessage::Cancel { block } => {
                buf.put_u32(13);
                buf.put_u8(Self::CANCEL);
                buf.put_u32(block.piece_index);
                buf.put_u32(block.offset);
                buf.put_u32(block.length);
            }
        }

        buf.to_vec()
    }

    /// Parse one frame's payload (id + body, without the length prefix).
    pub fn from_payload(mut payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let message_id = payload.get_u8();

        match message_id {
            Self::CHOKE => Ok(PeerMessage::Choke),
            Self::UNCHOKE => Ok(PeerMessage::Unchoke),
            Self::INTERESTED => Ok(PeerMessage::Interested),
            Self::NOT_INTERESTED => Ok(PeerMessage::NotInterested),
            Self::HAVE => {
                if payload.len() != 4 {
                    return Err(TorgetError::PeerError("Invalid Have message".to_string()));
                }
                Ok(PeerMessage::Have {
                    piece_index: payload.get_u32(),
                })
            }
            Self::BITFIELD => Ok(PeerMessage::Bitfield {
                bitfield: payload.to_vec(),
            }),
            Self::REQUEST => {
                if payload.len() != 12 {
                    return Err(TorgetError::PeerError(
                        "Invalid Request message".to_string(),
                    ));
                }
                Ok(PeerMessage::Request {
                    block: BlockInfo::new(payload.get_u32(), payload.get_u32(), payload.get_u32()),
                })
            }
            Self::PIECE => {
                // Index + offset; anything shorter is a protocol violation.
                if payload.len() < 8 {
                    return Err(TorgetError::PeerError("Invalid Piece message".to_string()));
                }
                let piece_index = payload.get_u32();
                let offset = payload.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: payload.to_vec(),
                })
            }
            Self::CANCEL => {
                if payload.len() != 12 {
                    return Err(TorgetError::PeerError(
                        "Invalid Cancel message".to_string(),
                    ));
                }
                Ok(PeerMessage::Cancel {
                    block: BlockInfo::new(payload.get_u32(), payload.get_u32(), payload.get_u32()),
                })
            }
            _ => Err(TorgetError::PeerError(format!(
                "Unknown message ID: {}",
                message_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: PeerMessage) {
        let bytes = message.to_bytes();
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + length);
        assert_eq!(PeerMessage::from_payload(&bytes[4..]).unwrap(), message);
    }

    #[test]
    fn test_roundtrip_all_messages() {
        roundtrip(PeerMessage::KeepAlive);
        roundtrip(PeerMessage::Choke);
        roundtrip(PeerMessage::Unchoke);
        roundtrip(PeerMessage::Interested);
        roundtrip(PeerMessage::NotInterested);
        roundtrip(PeerMessage::Have { piece_index: 9 });
        roundtrip(PeerMessage::Bitfield {
            bitfield: vec![0b1010_0000],
        });
        roundtrip(PeerMessage::Request {
            block: BlockInfo::new(1, 16384, 16384),
        });
        roundtrip(PeerMessage::Piece {
            piece_index: 1,
            offset: 16384,
            data: vec![0xcc; 64],
        });
        roundtrip(PeerMessage::Cancel {
            block: BlockInfo::new(1, 0, 16384),
        });
    }

    #[test]
    fn test_short_piece_payload_rejected() {
        // id 7 with only 7 payload bytes: offset is truncated.
        let payload = [7u8, 0, 0, 0, 1, 0, 0, 0];
        assert!(PeerMessage::from_payload(&payload).is_err());
    }

    #[test]
    fn test_empty_piece_data_is_valid() {
        let payload = [7u8, 0, 0, 0, 1, 0, 0, 0, 0];
        let message = PeerMessage::from_payload(&payload).unwrap();
        assert_eq!(
            message,
            PeerMessage::Piece {
                piece_index: 1,
                offset: 0,
                data: Vec::new()
            }
        );
    }

    #[test]
    fn test_unknown_id_rejected() {
        assert!(PeerMessage::from_payload(&[20u8, 0]).is_err());
    }
}
