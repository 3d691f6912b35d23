/// Events reported to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// BEP-15 announce event code. `None` is 0 on the wire.
    pub fn udp_code(event: Option<TrackerEvent>) -> u32 {
        match event {
            None => 0,
            Some(TrackerEvent::Completed) => 1,
            Some(TrackerEvent::Started) => 2,
            Some(TrackerEvent::Stopped) => 3,
        }
    }
}

/// Announce parameters shared by the HTTP and UDP transports.
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Unique peer ID
    pub peer_id: [u8; 20],
    /// Port this peer reports to the tracker
    pub port: u16,
    /// Total amount uploaded
    pub uploaded: u64,
    /// Total amount downloaded
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    /// Event (omitted from the query when None)
    pub event: Option<TrackerEvent>,
    /// Request compact peer list format
    pub compact: bool,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            compact: true,
        }
    }

    pub fn with_event(mut self, event: Option<TrackerEvent>) -> Self {
        self.event = event;
        self
    }

    /// Build the announce query string by hand.
    ///
    /// `info_hash` and `peer_id` are raw 20-byte binaries; each byte must
    /// appear percent-encoded exactly once. Feeding a pre-escaped string
    /// through a form encoder would escape the `%` itself and corrupt the
    /// announce.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            percent_encode_bytes(&self.info_hash),
            percent_encode_bytes(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
            if self.compact { "1" } else { "0" },
        );

        if let Some(event) = &self.event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }

        query
    }
}

/// Percent-encode every byte as `%xx`.
fn percent_encode_bytes(bytes: &[u8; 20]) -> String {
    bytes.iter().map(|b| format!("%{:02x}", b)).collect()
}
