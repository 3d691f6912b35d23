use super::Peer;
use crate::bencode::BencodeValue;
use crate::error::{Result, TorgetError};
use std::net::IpAddr;

/// A decoded announce response.
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    /// Seconds to wait before the next announce
    pub interval: u64,
    /// Number of seeders, when reported
    pub complete: Option<u64>,
    /// Number of leechers, when reported
    pub incomplete: Option<u64>,
    /// List of peers
    pub peers: Vec<Peer>,
}

impl TrackerResponse {
    pub fn from_bencode(value: BencodeValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| TorgetError::TrackerError("Response must be a dict".to_string()))?;

        if let Some(failure) = dict.get(b"failure reason".as_ref()) {
            let reason = failure.as_str().unwrap_or("Unknown failure").to_string();
            return Err(TorgetError::TrackerRejected(reason));
        }

        let interval = dict
            .get(b"interval".as_ref())
            .and_then(|v| v.as_int())
            .filter(|&n| n >= 0)
            .ok_or_else(|| TorgetError::TrackerError("Missing 'interval' field".to_string()))?
            as u64;

        let complete = dict
            .get(b"complete".as_ref())
            .and_then(|v| v.as_int())
            .map(|i| i as u64);

        let incomplete = dict
            .get(b"incomplete".as_ref())
            .and_then(|v| v.as_int())
            .map(|i| i as u64);

        let peers = match dict.get(b"peers".as_ref()) {
            // Compact form: 6 bytes per peer.
            Some(value) if value.as_bytes().is_some() => {
                let compact = value.as_bytes().unwrap_or_default();
                if compact.len() % 6 != 0 {
                    return Err(TorgetError::TrackerError(format!(
                        "Invalid peers length: {} (must be a multiple of 6)",
                        compact.len()
                    )));
                }
                Peer::from_compact_list(compact)
            }
            // Dictionary model.
            Some(value) if value.as_list().is_some() => {
                parse_peer_list(value.as_list().unwrap_or_default())?
            }
            Some(_) => {
                return Err(TorgetError::TrackerError(
                    "Invalid 'peers' format".to_string(),
                ))
            }
            None => {
                return Err(TorgetError::TrackerError(
                    "Missing 'peers' field".to_string(),
                ))
            }
        };

        Ok(TrackerResponse {
            interval,
            complete,
            incomplete,
            peers,
        })
    }
}

fn parse_peer_list(list: &[BencodeValue]) -> Result<Vec<Peer>> {
    let mut peers = Vec::new();

    for peer_value in list {
        let peer_dict = peer_value
            .as_dict()
            .ok_or_else(|| TorgetError::TrackerError("Peer must be a dict".to_string()))?;

        let ip_str = peer_dict
            .get(b"ip".as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorgetError::TrackerError("Missing peer 'ip'".to_string()))?;

        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| TorgetError::TrackerError("Invalid peer IP address".to_string()))?;

        let port = peer_dict
            .get(b"port".as_ref())
            .and_then(|v| v.as_int())
            .filter(|&p| p > 0 && p <= u16::MAX as i64)
            .ok_or_else(|| TorgetError::TrackerError("Missing peer 'port'".to_string()))?
            as u16;

        let peer = match peer_dict
            .get(b"peer id".as_ref())
            .and_then(|v| v.as_bytes())
        {
            Some(id) => Peer::with_peer_id(ip, port, id.to_vec()),
            None => Peer::new(ip, port),
        };

        peers.push(peer);
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_response() {
        let mut body = b"d8:intervali1800e5:peers12:".to_vec();
        body.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2]);
        body.push(b'e');

        let response = TrackerResponse::from_bencode(decode(&body).unwrap()).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].addr, "10.0.0.1:6881".parse().unwrap());
    }

    #[test]
    fn test_failure_reason_is_rejection() {
        let body = b"d14:failure reason9:not todaye";
        let err = TrackerResponse::from_bencode(decode(body).unwrap()).unwrap_err();
        assert!(matches!(err, TorgetError::TrackerRejected(reason) if reason == "not today"));
    }

    #[test]
    fn test_ragged_compact_list_rejected() {
        let mut body = b"d8:intervali1800e5:peers7:".to_vec();
        body.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1, 9]);
        body.push(b'e');
        assert!(TrackerResponse::from_bencode(decode(&body).unwrap()).is_err());
    }
}
