mod common;

use common::*;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use torget::client::{ClientConfig, TorrentClient};
use torget::error::TorgetError;
use torget::peer::{PeerConnection, PeerSession};
use torget::piece::{PieceScheduler, VerifiedPiece};
use torget::storage::StorageManager;
use torget::torrent::{parse_torrent, Metainfo};

const OUR_PEER_ID: [u8; 20] = *b"-TG0001-integration1";

fn new_scheduler(meta: &Metainfo) -> Arc<Mutex<PieceScheduler>> {
    Arc::new(Mutex::new(PieceScheduler::new(
        meta.info.piece_length,
        meta.info.total_length,
        meta.info.pieces.clone(),
    )))
}

/// Single file, two pieces (the second short), one peer serving honestly.
#[tokio::test]
async fn single_file_two_pieces_one_peer() {
    let content: Vec<u8> = (0u8..48).collect();
    let data = build_single_file_torrent("http://unused/announce", "data.bin", 32, &content);
    let meta = parse_torrent(&data).unwrap();
    assert_eq!(meta.info.pieces.len(), 2);

    let seeder = spawn_seeder(meta.info_hash, 32, content.clone(), SeederScript::Serve).await;

    let dir = tempdir().unwrap();
    let scheduler = new_scheduler(&meta);
    let storage = StorageManager::new(dir.path(), &meta.info).await.unwrap();
    let (verified_tx, verified_rx) = mpsc::channel::<VerifiedPiece>(4);
    let writer = tokio::spawn(storage.run(verified_rx, scheduler.clone()));

    let conn = PeerConnection::connect(seeder, meta.info_hash, OUR_PEER_ID)
        .await
        .unwrap();
    PeerSession::new(conn, scheduler, verified_tx, 2)
        .run()
        .await
        .unwrap();

    writer.await.unwrap().unwrap();

    let written = std::fs::read(dir.path().join("data.bin")).unwrap();
    assert_eq!(written.len(), 48);
    assert_eq!(written, content);
}

/// Multi-file layout where piece 0 crosses the file boundary.
#[tokio::test]
async fn multi_file_piece_crosses_boundary() {
    let content: Vec<u8> = (100u8..132).collect();
    let data = build_multi_file_torrent(
        "http://unused/announce",
        "album",
        16,
        &[("one.txt", 10), ("two.txt", 22)],
        &content,
    );
    let meta = parse_torrent(&data).unwrap();
    assert!(meta.info.multi_file);
    assert_eq!(meta.info.pieces.len(), 2);

    let seeder = spawn_seeder(meta.info_hash, 16, content.clone(), SeederScript::Serve).await;

    let dir = tempdir().unwrap();
    let scheduler = new_scheduler(&meta);
    let storage = StorageManager::new(dir.path(), &meta.info).await.unwrap();
    let (verified_tx, verified_rx) = mpsc::channel::<VerifiedPiece>(4);
    let writer = tokio::spawn(storage.run(verified_rx, scheduler.clone()));

    let conn = PeerConnection::connect(seeder, meta.info_hash, OUR_PEER_ID)
        .await
        .unwrap();
    PeerSession::new(conn, scheduler, verified_tx, 2)
        .run()
        .await
        .unwrap();

    writer.await.unwrap().unwrap();

    let one = std::fs::read(dir.path().join("album/one.txt")).unwrap();
    let two = std::fs::read(dir.path().join("album/two.txt")).unwrap();
    assert_eq!(one, &content[..10]);
    assert_eq!(two, &content[10..]);
}

/// First peer dies after one block; the piece returns to the pool and a
/// second peer finishes it.
#[tokio::test]
async fn peer_fails_mid_piece_and_another_recovers() {
    // One piece of two blocks, so the drop lands mid-piece.
    let content: Vec<u8> = (0..32768u32).map(|i| (i % 251) as u8).collect();
    let data = build_single_file_torrent("http://unused/announce", "blob.bin", 32768, &content);
    let meta = parse_torrent(&data).unwrap();
    assert_eq!(meta.info.pieces.len(), 1);

    let flaky = spawn_seeder(
        meta.info_hash,
        32768,
        content.clone(),
        SeederScript::DropAfterBlocks(1),
    )
    .await;
    let solid = spawn_seeder(meta.info_hash, 32768, content.clone(), SeederScript::Serve).await;

    let dir = tempdir().unwrap();
    let scheduler = new_scheduler(&meta);
    let storage = StorageManager::new(dir.path(), &meta.info).await.unwrap();
    let (verified_tx, verified_rx) = mpsc::channel::<VerifiedPiece>(4);
    let writer = tokio::spawn(storage.run(verified_rx, scheduler.clone()));

    let conn = PeerConnection::connect(flaky, meta.info_hash, OUR_PEER_ID)
        .await
        .unwrap();
    let result = PeerSession::new(conn, scheduler.clone(), verified_tx.clone(), 1)
        .run()
        .await;
    assert!(result.is_err(), "a dead connection must end the session");

    // The failed piece is assignable again and completes elsewhere.
    let conn = PeerConnection::connect(solid, meta.info_hash, OUR_PEER_ID)
        .await
        .unwrap();
    PeerSession::new(conn, scheduler, verified_tx, 1)
        .run()
        .await
        .unwrap();

    writer.await.unwrap().unwrap();
    assert_eq!(std::fs::read(dir.path().join("blob.bin")).unwrap(), content);
}

/// A peer serving corrupted bytes is dropped; the piece is re-fetched
/// from an honest peer and the download still completes.
#[tokio::test]
async fn hash_mismatch_recovers_via_other_peer() {
    let content: Vec<u8> = (0u8..64).collect();
    let data = build_single_file_torrent("http://unused/announce", "data.bin", 32, &content);
    let meta = parse_torrent(&data).unwrap();

    let corrupt = spawn_seeder(meta.info_hash, 32, content.clone(), SeederScript::Corrupt).await;
    let honest = spawn_seeder(meta.info_hash, 32, content.clone(), SeederScript::Serve).await;

    let dir = tempdir().unwrap();
    let scheduler = new_scheduler(&meta);
    let storage = StorageManager::new(dir.path(), &meta.info).await.unwrap();
    let (verified_tx, verified_rx) = mpsc::channel::<VerifiedPiece>(4);
    let writer = tokio::spawn(storage.run(verified_rx, scheduler.clone()));

    let conn = PeerConnection::connect(corrupt, meta.info_hash, OUR_PEER_ID)
        .await
        .unwrap();
    let result = PeerSession::new(conn, scheduler.clone(), verified_tx.clone(), 2)
        .run()
        .await;
    assert!(
        matches!(result, Err(TorgetError::PieceError(_))),
        "a hash mismatch must end the session"
    );

    let conn = PeerConnection::connect(honest, meta.info_hash, OUR_PEER_ID)
        .await
        .unwrap();
    PeerSession::new(conn, scheduler, verified_tx, 2)
        .run()
        .await
        .unwrap();

    writer.await.unwrap().unwrap();
    assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), content);
}

/// The whole client against a scripted HTTP tracker and a scripted
/// seeder, from .torrent file to verified bytes on disk.
#[tokio::test]
async fn full_client_download_via_http_tracker() {
    let content: Vec<u8> = (0..3000u32).map(|i| (i % 241) as u8).collect();

    let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let announce = format!("http://{}/announce", tracker_listener.local_addr().unwrap());

    let data = build_single_file_torrent(&announce, "payload.bin", 1024, &content);
    let meta = parse_torrent(&data).unwrap();

    let seeder = spawn_seeder(meta.info_hash, 1024, content.clone(), SeederScript::Serve).await;
    let mut tracker_requests = serve_http(tracker_listener, tracker_body(&[seeder], 1800));

    let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_url = format!("http://{}/ip", echo_listener.local_addr().unwrap());
    serve_http(echo_listener, b"203.0.113.7".to_vec());

    let dir = tempdir().unwrap();
    let torrent_path = dir.path().join("payload.torrent");
    std::fs::write(&torrent_path, &data).unwrap();
    let out_dir = dir.path().join("out");

    let config = ClientConfig {
        download_dir: out_dir.display().to_string(),
        max_peers: 4,
        ip_echo_url: echo_url,
        use_bootstrap_trackers: false,
        ..Default::default()
    };
    TorrentClient::new(config)
        .download(&torrent_path)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(out_dir.join("payload.bin")).unwrap(),
        content
    );

    // The announce went over the wire with every info-hash byte escaped
    // exactly once.
    let request_line = tracker_requests.recv().await.unwrap();
    let escaped: String = meta
        .info_hash
        .iter()
        .map(|b| format!("%{:02x}", b))
        .collect();
    assert!(request_line.contains(&format!("info_hash={}", escaped)));
    assert!(!request_line.contains("%25"));
}

/// The tracker hands back our own address: the candidate is skipped
/// without a connection attempt and the pool drains empty-handed.
#[tokio::test]
async fn own_address_is_never_dialed() {
    let content: Vec<u8> = (0u8..16).collect();

    let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let announce = format!("http://{}/announce", tracker_listener.local_addr().unwrap());
    let data = build_single_file_torrent(&announce, "data.bin", 16, &content);

    // Canary: if the client ever dials the "peer", the accept fires.
    let canary = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let canary_addr = canary.local_addr().unwrap();
    let (dialed_tx, mut dialed_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if canary.accept().await.is_ok() {
            let _ = dialed_tx.send(());
        }
    });

    serve_http(tracker_listener, tracker_body(&[canary_addr], 1800));

    // The echo service reports the canary's own IP as ours.
    let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_url = format!("http://{}/ip", echo_listener.local_addr().unwrap());
    serve_http(echo_listener, b"127.0.0.1".to_vec());

    let dir = tempdir().unwrap();
    let torrent_path = dir.path().join("data.torrent");
    std::fs::write(&torrent_path, &data).unwrap();

    let config = ClientConfig {
        download_dir: dir.path().join("out").display().to_string(),
        ip_echo_url: echo_url,
        use_bootstrap_trackers: false,
        ..Default::default()
    };
    let result = TorrentClient::new(config).download(&torrent_path).await;

    assert!(matches!(
        result,
        Err(TorgetError::DownloadIncomplete(0, 1))
    ));
    assert!(
        dialed_rx.try_recv().is_err(),
        "the client opened a socket to its own address"
    );
}
