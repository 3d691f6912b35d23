mod bitfield;
mod connection;
mod message;
mod protocol;
mod session;

pub use bitfield::Bitfield;
pub use connection::PeerConnection;
pub use message::{BlockInfo, PeerMessage, MAX_MESSAGE_SIZE};
pub use protocol::{Handshake, PROTOCOL_STRING};
pub use session::PeerSession;
