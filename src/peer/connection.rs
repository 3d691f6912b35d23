use super::{Handshake, PeerMessage, MAX_MESSAGE_SIZE};
use crate::error::{Result, TorgetError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

/// TCP connect deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for each half of the handshake exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-message read/write deadline.
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

const SEND_ATTEMPTS: u32 = 3;
const SEND_BACKOFF: Duration = Duration::from_secs(2);

/// A framed connection to a remote peer, established by handshake.
pub struct PeerConnection {
    addr: SocketAddr,
    stream: TcpStream,
    peer_id: [u8; 20],
}

impl PeerConnection {
    /// Open a TCP connection and exchange the 68-byte handshake. The
    /// remote's info-hash must match ours.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
    ) -> Result<Self> {
        let mut stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TorgetError::PeerError(format!("Connect to {} timed out", addr)))?
            .map_err(|e| TorgetError::PeerError(format!("Failed to connect to {}: {}", addr, e)))?;

        let handshake = Handshake::new(info_hash, our_peer_id);
        time::timeout(HANDSHAKE_TIMEOUT, stream.write_all(&handshake.to_bytes()))
            .await
            .map_err(|_| TorgetError::PeerError(format!("Handshake to {} timed out", addr)))??;

        let mut buf = [0u8; Handshake::LENGTH];
        time::timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .map_err(|_| {
                TorgetError::PeerError(format!("Handshake from {} timed out", addr))
            })??;

        let remote = Handshake::from_bytes(&buf)?;
        if remote.info_hash != info_hash {
            return Err(TorgetError::PeerError(format!(
                "Info hash mismatch from {}",
                addr
            )));
        }

        debug!("Handshake with {} complete", addr);

        Ok(Self {
            addr,
            stream,
            peer_id: remote.peer_id,
        })
    }

    /// Send one message, retrying failed writes before giving up.
    pub async fn send_message(&mut self, message: &PeerMessage) -> Result<()> {
        let bytes = message.to_bytes();
        let mut last_error = String::new();

        for attempt in 1..=SEND_ATTEMPTS {
            match time::timeout(MESSAGE_TIMEOUT, self.stream.write_all(&bytes)).await {
                Ok(Ok(())) => {
                    debug!("Sent message to {}: {:?}", self.addr, message);
                    return Ok(());
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = "write timed out".to_string(),
            }

            warn!(
                "Send to {} failed (attempt {}/{}): {}",
                self.addr, attempt, SEND_ATTEMPTS, last_error
            );
            if attempt < SEND_ATTEMPTS {
                time::sleep(SEND_BACKOFF).await;
            }
        }

        Err(TorgetError::PeerError(format!(
            "Failed to send to {} after {} attempts: {}",
            self.addr, SEND_ATTEMPTS, last_error
        )))
    }

    /// Receive one message. Length-zero frames come back as `KeepAlive`;
    /// frames over the 1 MiB cap end the session.
    pub async fn receive_message(&mut self) -> Result<PeerMessage> {
        let mut length_buf = [0u8; 4];
        time::timeout(MESSAGE_TIMEOUT, self.stream.read_exact(&mut length_buf))
            .await
            .map_err(|_| TorgetError::PeerError(format!("Read from {} timed out", self.addr)))??;

        let length = u32::from_be_bytes(length_buf) as usize;

        if length == 0 {
            return Ok(PeerMessage::KeepAlive);
        }

        if length > MAX_MESSAGE_SIZE {
            return Err(TorgetError::PeerError(format!(
                "Message too large: {} bytes from {}",
                length, self.addr
            )));
        }

        let mut payload = vec![0u8; length];
        time::timeout(MESSAGE_TIMEOUT, self.stream.read_exact(&mut payload))
            .await
            .map_err(|_| TorgetError::PeerError(format!("Read from {} timed out", self.addr)))??;

        let message = PeerMessage::from_payload(&payload)?;
        debug!("Received message from {}: {:?}", self.addr, message);

        Ok(message)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }
}
