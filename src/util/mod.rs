use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Default plain-text echo service for external-IP discovery.
pub const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org";

const ECHO_TIMEOUT: Duration = Duration::from_secs(10);

/// Discover the address remote peers would see for us, used to skip
/// tracker entries that point back at this client.
///
/// Asks the configured echo service first; when that fails, falls back to
/// the local address of an outbound socket. `None` leaves self-connection
/// filtering disabled rather than failing the download.
pub async fn discover_external_ip(echo_url: &str) -> Option<IpAddr> {
    if let Some(ip) = fetch_echo(echo_url).await {
        debug!("External IP from {}: {}", echo_url, ip);
        return Some(ip);
    }

    warn!("IP echo service {} unavailable, using outbound address", echo_url);
    let ip = local_outbound_ip();
    if let Some(ip) = ip {
        debug!("Outbound local IP: {}", ip);
    }
    ip
}

async fn fetch_echo(echo_url: &str) -> Option<IpAddr> {
    let client = reqwest::Client::builder()
        .timeout(ECHO_TIMEOUT)
        .build()
        .ok()?;
    let body = client.get(echo_url).send().await.ok()?.text().await.ok()?;
    body.trim().parse().ok()
}

/// The local address an outbound UDP socket would use. No packet is sent;
/// connect only fixes the routing decision.
fn local_outbound_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}
