use crate::error::{Result, TorgetError};
use crate::peer::{PeerConnection, PeerSession};
use crate::piece::{PieceScheduler, VerifiedPiece};
use crate::storage::StorageManager;
use crate::torrent::Metainfo;
use crate::tracker::{generate_peer_id, TrackerClient, TrackerRequest};
use crate::util::{discover_external_ip, DEFAULT_IP_ECHO_URL};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

/// Hard ceiling on concurrent handshakes and download sessions.
const MAX_ACTIVE_SESSIONS: usize = 10;

/// Delay before retrying after a failed refresh announce.
const REFRESH_RETRY: Duration = Duration::from_secs(60);

/// Configuration for the client.
pub struct ClientConfig {
    pub download_dir: String,
    pub listen_port: u16,
    pub max_peers: usize,
    pub ip_echo_url: String,
    /// Also announce to the built-in public trackers
    pub use_bootstrap_trackers: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            listen_port: 6881,
            max_peers: MAX_ACTIVE_SESSIONS,
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            use_bootstrap_trackers: true,
        }
    }
}

/// Candidate endpoints seen so far, across trackers and refresh cycles.
/// Admission succeeds exactly once per `(ip, port)`.
struct PeerDirectory {
    seen: Mutex<HashSet<SocketAddr>>,
}

impl PeerDirectory {
    fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    async fn admit(&self, addr: SocketAddr) -> bool {
        self.seen.lock().await.insert(addr)
    }
}

/// Everything a session task needs, cloned per candidate. Sessions get
/// the scheduler and the verified-piece sender as capabilities; they
/// never see each other or the directory internals.
struct SwarmContext {
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    num_pieces: usize,
    external_ip: Option<IpAddr>,
    scheduler: Arc<Mutex<PieceScheduler>>,
    verified_tx: mpsc::Sender<VerifiedPiece>,
    directory: Arc<PeerDirectory>,
    semaphore: Arc<Semaphore>,
}

impl SwarmContext {
    fn spawn_session(&self, sessions: &mut JoinSet<Result<()>>, addr: SocketAddr) {
        // Never handshake with ourselves; the check runs before any
        // socket is opened.
        if self.external_ip == Some(addr.ip()) {
            debug!("Skipping candidate {}: own external address", addr);
            return;
        }

        let info_hash = self.info_hash;
        let peer_id = self.peer_id;
        let num_pieces = self.num_pieces;
        let scheduler = self.scheduler.clone();
        let verified_tx = self.verified_tx.clone();
        let directory = self.directory.clone();
        let semaphore = self.semaphore.clone();

        sessions.spawn(async move {
            if !directory.admit(addr).await {
                return Ok(());
            }

            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| TorgetError::PeerError("Session pool closed".to_string()))?;

            let conn = PeerConnection::connect(addr, info_hash, peer_id).await?;
            info!(
                "Connected to peer {} (id {})",
                addr,
                String::from_utf8_lossy(conn.peer_id())
            );

            PeerSession::new(conn, scheduler, verified_tx, num_pieces)
                .run()
                .await
        });
    }
}

/// The downloader: wires metadata, trackers, sessions, scheduler, and
/// writer together and runs the swarm to completion.
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        Self { config, peer_id }
    }

    /// Download a torrent to completion.
    pub async fn download(&self, torrent_path: &Path) -> Result<()> {
        info!("Starting download for: {}", torrent_path.display());

        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;

        info!("Torrent: {}", metainfo.info.name);
        info!("Total size: {} bytes", metainfo.info.total_length);
        info!("Pieces: {}", metainfo.info.pieces.len());
        info!("Info hash: {}", metainfo.info_hash_hex());

        self.run_swarm(metainfo).await
    }

    /// Run the swarm for already-parsed metadata.
    pub async fn run_swarm(&self, metainfo: Metainfo) -> Result<()> {
        let num_pieces = metainfo.info.pieces.len();
        let external_ip = discover_external_ip(&self.config.ip_echo_url).await;

        let storage = StorageManager::new(&self.config.download_dir, &metainfo.info).await?;
        let scheduler = Arc::new(Mutex::new(PieceScheduler::new(
            metainfo.info.piece_length,
            metainfo.info.total_length,
            metainfo.info.pieces.clone(),
        )));

        let tracker = if self.config.use_bootstrap_trackers {
            TrackerClient::new()?
        } else {
            TrackerClient::without_bootstrap()?
        };
        let urls = metainfo.tracker_urls();
        let request = TrackerRequest::new(
            metainfo.info_hash,
            self.peer_id,
            self.config.listen_port,
            metainfo.info.total_length,
        );

        // Initial announce round; zero peers here is fatal.
        let (initial_peers, interval) = tracker.announce_round(&urls, &request).await?;
        info!(
            "Initial announce: {} peers, refresh every {}s",
            initial_peers.len(),
            interval
        );

        let (verified_tx, verified_rx) = mpsc::channel::<VerifiedPiece>(num_pieces.max(1));
        let mut writer = tokio::spawn(storage.run(verified_rx, scheduler.clone()));

        let ctx = SwarmContext {
            info_hash: metainfo.info_hash,
            peer_id: self.peer_id,
            num_pieces,
            external_ip,
            scheduler: scheduler.clone(),
            verified_tx,
            directory: Arc::new(PeerDirectory::new()),
            semaphore: Arc::new(Semaphore::new(self.config.max_peers.min(MAX_ACTIVE_SESSIONS))),
        };

        let (endpoint_tx, mut endpoint_rx) = mpsc::channel::<SocketAddr>(64);
        let refresh = tokio::spawn(refresh_loop(
            tracker,
            urls,
            request.with_event(None),
            interval,
            endpoint_tx,
        ));

        let mut sessions: JoinSet<Result<()>> = JoinSet::new();
        for peer in initial_peers {
            ctx.spawn_session(&mut sessions, peer.addr);
        }

        let result = loop {
            if sessions.is_empty() {
                // Admit anything the refresh loop already delivered before
                // declaring the pool drained.
                while let Ok(addr) = endpoint_rx.try_recv() {
                    ctx.spawn_session(&mut sessions, addr);
                }
                if sessions.is_empty() {
                    let progress = scheduler.lock().await;
                    if !progress.is_complete() {
                        break Err(TorgetError::DownloadIncomplete(
                            progress.complete_count(),
                            num_pieces,
                        ));
                    }
                    // Complete: the writer finishes below.
                }
            }

            tokio::select! {
                result = &mut writer => {
                    break result.unwrap_or_else(|err| {
                        Err(TorgetError::StorageError(format!("Writer task failed: {}", err)))
                    });
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => debug!("Session ended: {}", err),
                        Err(err) => warn!("Session task panicked: {}", err),
                    }
                }
                Some(addr) = endpoint_rx.recv() => {
                    ctx.spawn_session(&mut sessions, addr);
                }
            }
        };

        refresh.abort();
        if !writer.is_finished() {
            writer.abort();
        }
        // Dropping the JoinSet aborts any session still running.
        drop(sessions);

        if result.is_ok() {
            info!("Download complete and verified");
        }
        result
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

/// Re-announce on the tracker interval and feed newly seen endpoints to
/// the admission loop. Failed rounds retry after a fixed delay.
async fn refresh_loop(
    tracker: TrackerClient,
    urls: Vec<String>,
    request: TrackerRequest,
    mut interval: u64,
    endpoint_tx: mpsc::Sender<SocketAddr>,
) {
    loop {
        time::sleep(Duration::from_secs(interval)).await;

        match tracker.announce_round(&urls, &request).await {
            Ok((peers, next_interval)) => {
                debug!("Refresh announce: {} peers", peers.len());
                interval = next_interval;
                for peer in peers {
                    if endpoint_tx.send(peer.addr).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                warn!("Refresh announce failed: {}", err);
                interval = REFRESH_RETRY.as_secs();
            }
        }
    }
}
