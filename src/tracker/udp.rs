use super::{Peer, TrackerEvent, TrackerRequest, TrackerResponse};
use crate::error::{Result, TorgetError};
use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, warn};

/// Protocol magic of the connect request.
const PROTOCOL_MAGIC: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Per-attempt receive deadlines for the connect exchange.
const CONNECT_TIMEOUTS: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(7),
    Duration::from_secs(9),
];

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Generate a random 32-bit transaction ID.
pub fn generate_transaction_id() -> u32 {
    rand::thread_rng().gen()
}

/// 16-byte connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    pub transaction_id: u32,
}

impl ConnectRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u64(PROTOCOL_MAGIC);
        buf.put_u32(ACTION_CONNECT);
        buf.put_u32(self.transaction_id);
        buf.to_vec()
    }
}

/// 16-byte connect response carrying the connection ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    pub connection_id: u64,
}

impl ConnectResponse {
    pub const LENGTH: usize = 16;

    pub fn from_bytes(mut data: &[u8], transaction_id: u32) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(TorgetError::TrackerError(format!(
                "Connect response too short: {} bytes",
                data.len()
            )));
        }

        let action = data.get_u32();
        if action != ACTION_CONNECT {
            return Err(TorgetError::TrackerError(format!(
                "Invalid connect action: {}",
                action
            )));
        }
        if data.get_u32() != transaction_id {
            return Err(TorgetError::TrackerError(
                "Connect transaction ID mismatch".to_string(),
            ));
        }

        Ok(Self {
            connection_id: data.get_u64(),
        })
    }
}

/// 98-byte announce request with fields at fixed offsets.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: u32,
    pub key: u32,
    pub num_want: i32,
    pub port: u16,
}

impl AnnounceRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(98);
        buf.put_u64(self.connection_id);
        buf.put_u32(ACTION_ANNOUNCE);
        buf.put_u32(self.transaction_id);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.put_u64(self.downloaded);
        buf.put_u64(self.left);
        buf.put_u64(self.uploaded);
        buf.put_u32(self.event);
        buf.put_u32(0); // ip: let the tracker use the source address
        buf.put_u32(self.key);
        buf.put_i32(self.num_want);
        buf.put_u16(self.port);
        buf.to_vec()
    }
}

/// Parsed announce response (action 1) or tracker error (action 3).
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<Peer>,
}

impl AnnounceResponse {
    pub fn from_bytes(data: &[u8], transaction_id: u32) -> Result<Self> {
        if data.len() < 8 {
            return Err(TorgetError::TrackerError(format!(
                "Announce response too short: {} bytes",
                data.len()
            )));
        }

        let mut header = data;
        let action = header.get_u32();

        if action == ACTION_ERROR {
            let message = String::from_utf8_lossy(&data[8..]).into_owned();
            return Err(TorgetError::TrackerRejected(message));
        }
        if action != ACTION_ANNOUNCE {
            return Err(TorgetError::TrackerError(format!(
                "Invalid announce action: {}",
                action
            )));
        }
        if header.get_u32() != transaction_id {
            return Err(TorgetError::TrackerError(
                "Announce transaction ID mismatch".to_string(),
            ));
        }
        if data.len() < 20 {
            return Err(TorgetError::TrackerError(format!(
                "Announce response too short: {} bytes",
                data.len()
            )));
        }

        let interval = header.get_u32();
        let leechers = header.get_u32();
        let seeders = header.get_u32();

        let compact = &data[20..];
        if compact.len() % 6 != 0 {
            return Err(TorgetError::TrackerError(format!(
                "Invalid peers length: {} (must be a multiple of 6)",
                compact.len()
            )));
        }

        Ok(Self {
            interval,
            leechers,
            seeders,
            peers: Peer::from_compact_list(compact),
        })
    }
}

/// Announce to a `udp://` tracker per BEP-15: connect with retries, then
/// a single announce exchange.
pub async fn announce(tracker_url: &str, request: &TrackerRequest) -> Result<TrackerResponse> {
    let url = url::Url::parse(tracker_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| TorgetError::TrackerError(format!("No host in {}", tracker_url)))?;
    let port = url
        .port()
        .ok_or_else(|| TorgetError::TrackerError(format!("No port in {}", tracker_url)))?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((host, port)).await?;

    let transaction_id = generate_transaction_id();
    let connect = ConnectRequest { transaction_id }.to_bytes();

    debug!(
        "Connecting to UDP tracker {} (transaction {})",
        tracker_url, transaction_id
    );

    let mut connection_id = None;
    for (attempt, timeout) in CONNECT_TIMEOUTS.iter().enumerate() {
        if let Err(err) = socket.send(&connect).await {
            warn!("Connect attempt {} send failed: {}", attempt + 1, err);
            continue;
        }

        let mut buf = [0u8; 16];
        match time::timeout(*timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) if n < ConnectResponse::LENGTH => {
                warn!("Connect attempt {}: short response ({} bytes)", attempt + 1, n);
            }
            Ok(Ok(n)) => {
                connection_id =
                    Some(ConnectResponse::from_bytes(&buf[..n], transaction_id)?.connection_id);
                break;
            }
            Ok(Err(err)) => warn!("Connect attempt {} read failed: {}", attempt + 1, err),
            Err(_) => warn!(
                "Connect attempt {} timed out after {:?}",
                attempt + 1,
                timeout
            ),
        }
    }

    let connection_id = connection_id.ok_or_else(|| {
        TorgetError::TrackerError(format!(
            "No connect response from {} after {} attempts",
            tracker_url,
            CONNECT_TIMEOUTS.len()
        ))
    })?;

    let announce = AnnounceRequest {
        connection_id,
        transaction_id,
        info_hash: request.info_hash,
        peer_id: request.peer_id,
        downloaded: request.downloaded,
        left: request.left,
        uploaded: request.uploaded,
        event: TrackerEvent::udp_code(request.event),
        key: rand::thread_rng().gen(),
        num_want: -1,
        port: request.port,
    };

    socket.send(&announce.to_bytes()).await?;

    let mut buf = [0u8; 1024];
    let n = time::timeout(ANNOUNCE_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| {
            TorgetError::TrackerError(format!("Announce to {} timed out", tracker_url))
        })??;

    let response = AnnounceResponse::from_bytes(&buf[..n], transaction_id)?;

    debug!(
        "UDP tracker {}: {} peers, {} seeders, {} leechers, interval {}s",
        tracker_url,
        response.peers.len(),
        response.seeders,
        response.leechers,
        response.interval
    );

    Ok(TrackerResponse {
        interval: response.interval as u64,
        complete: Some(response.seeders as u64),
        incomplete: Some(response.leechers as u64),
        peers: response.peers,
    })
}
