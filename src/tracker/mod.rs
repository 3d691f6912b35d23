mod client;
mod peer;
mod request;
mod response;
mod udp;

pub use client::TrackerClient;
pub use peer::Peer;
pub use request::{TrackerEvent, TrackerRequest};
pub use response::TrackerResponse;
pub use udp::{
    announce as announce_udp, generate_transaction_id, AnnounceRequest, AnnounceResponse,
    ConnectRequest, ConnectResponse,
};

use rand::Rng;

/// Client prefix of the peer ID (Azureus convention).
pub const PEER_ID_PREFIX: &[u8; 8] = b"-TG0001-";

/// Alphabet for the random tail of the peer ID.
const PEER_ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvxyz";

/// Generate the 20-byte peer ID: fixed prefix + 12 random characters.
/// Called once per process; the swarm keeps the result for its lifetime.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(PEER_ID_PREFIX);

    let mut rng = rand::thread_rng();
    for byte in &mut peer_id[8..] {
        *byte = PEER_ID_CHARSET[rng.gen_range(0..PEER_ID_CHARSET.len())];
    }

    peer_id
}
