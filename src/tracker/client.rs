use super::{Peer, TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{Result, TorgetError};
use reqwest::Client;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Public trackers tried in addition to the torrent's own announce URLs.
const BOOTSTRAP_TRACKERS: [&str; 5] = [
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://open.tracker.cl:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.tiny-vps.com:6969/announce",
];

/// Total deadline for one HTTP announce.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Announce interval used when no tracker reports a usable one.
const FALLBACK_INTERVAL: u64 = 120;

/// Client for announcing to HTTP(S) and UDP trackers.
pub struct TrackerClient {
    client: Client,
    use_bootstrap: bool,
}

impl TrackerClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            use_bootstrap: true,
        })
    }

    /// A client that only contacts the torrent's own trackers.
    pub fn without_bootstrap() -> Result<Self> {
        let mut client = Self::new()?;
        client.use_bootstrap = false;
        Ok(client)
    }

    /// Announce to a single tracker, picking the transport from the scheme.
    pub async fn announce(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        if tracker_url.starts_with("udp://") {
            super::udp::announce(tracker_url, request).await
        } else if tracker_url.starts_with("http://") || tracker_url.starts_with("https://") {
            self.announce_http(tracker_url, request).await
        } else {
            Err(TorgetError::TrackerError(format!(
                "Unsupported tracker scheme: {}",
                tracker_url
            )))
        }
    }

    async fn announce_http(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        // The query carries pre-escaped binaries, so it is appended verbatim
        // rather than going through a form encoder.
        let mut url = tracker_url.to_string();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&request.to_query_string());
        let url = reqwest::Url::parse(&url)?;

        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(TorgetError::TrackerError(format!(
                "HTTP error: {}",
                status
            )));
        }

        TrackerResponse::from_bencode(decode(&body)?)
    }

    /// One announce round over every known tracker: the torrent's own URLs
    /// plus the bootstrap list. Peers are deduplicated by `(ip, port)`
    /// across all responses; the shortest non-zero interval wins.
    pub async fn announce_round(
        &self,
        urls: &[String],
        request: &TrackerRequest,
    ) -> Result<(Vec<Peer>, u64)> {
        let mut tried: HashSet<&str> = HashSet::new();
        let mut seen: HashSet<SocketAddr> = HashSet::new();
        let mut peers = Vec::new();
        let mut interval = 0u64;

        let bootstrap = if self.use_bootstrap {
            &BOOTSTRAP_TRACKERS[..]
        } else {
            &[]
        };

        for url in urls
            .iter()
            .map(String::as_str)
            .chain(bootstrap.iter().copied())
        {
            if !tried.insert(url) {
                continue;
            }

            match self.announce(url, request).await {
                Ok(response) => {
                    info!(
                        "Tracker {}: {} peers (interval {}s)",
                        url,
                        response.peers.len(),
                        response.interval
                    );
                    if response.interval > 0 && (interval == 0 || response.interval < interval) {
                        interval = response.interval;
                    }
                    for peer in response.peers {
                        if seen.insert(peer.addr) {
                            peers.push(peer);
                        }
                    }
                }
                Err(err) => warn!("Tracker {} failed: {}", url, err),
            }
        }

        if peers.is_empty() {
            return Err(TorgetError::NoPeers);
        }

        let interval = if interval == 0 {
            FALLBACK_INTERVAL
        } else {
            interval
        };

        Ok((peers, interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_scheme_rejected() {
        let client = TrackerClient::new().unwrap();
        let request = TrackerRequest::new([0; 20], [0; 20], 6881, 0);
        let err = client.announce("wss://tracker/announce", &request).await;
        assert!(matches!(err, Err(TorgetError::TrackerError(_))));
    }
}
