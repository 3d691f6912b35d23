//! Shared helpers: synthetic torrents and scripted peers/trackers over
//! localhost sockets.

#![allow(dead_code)]

use sha1::{Digest, Sha1};
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use torget::peer::{Bitfield, Handshake, PeerMessage};

/// SHA1 the content piece-wise into a concatenated `pieces` string.
fn piece_hashes(content: &[u8], piece_length: usize) -> Vec<u8> {
    let mut pieces = Vec::new();
    for chunk in content.chunks(piece_length) {
        pieces.extend_from_slice(&<[u8; 20]>::from(Sha1::digest(chunk)));
    }
    pieces
}

fn bencode_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(format!("{}:{}", s.len(), s).as_bytes());
}

/// Build the bytes of a single-file .torrent.
pub fn build_single_file_torrent(
    announce: &str,
    name: &str,
    piece_length: usize,
    content: &[u8],
) -> Vec<u8> {
    let pieces = piece_hashes(content, piece_length);

    let mut data = Vec::new();
    data.extend_from_slice(b"d8:announce");
    bencode_str(&mut data, announce);
    data.extend_from_slice(b"4:infod");
    data.extend_from_slice(format!("6:lengthi{}e", content.len()).as_bytes());
    data.extend_from_slice(b"4:name");
    bencode_str(&mut data, name);
    data.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    data.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
    data.extend_from_slice(&pieces);
    data.extend_from_slice(b"ee");
    data
}

/// Build the bytes of a multi-file .torrent over one flat content stream.
pub fn build_multi_file_torrent(
    announce: &str,
    name: &str,
    piece_length: usize,
    files: &[(&str, usize)],
    content: &[u8],
) -> Vec<u8> {
    assert_eq!(content.len(), files.iter().map(|(_, len)| len).sum::<usize>());
    let pieces = piece_hashes(content, piece_length);

    let mut data = Vec::new();
    data.extend_from_slice(b"d8:announce");
    bencode_str(&mut data, announce);
    data.extend_from_slice(b"4:infod5:filesl");
    for (path, length) in files {
        data.extend_from_slice(format!("d6:lengthi{}e4:pathl", length).as_bytes());
        for component in path.split('/') {
            bencode_str(&mut data, component);
        }
        data.extend_from_slice(b"ee");
    }
    data.extend_from_slice(b"e4:name");
    bencode_str(&mut data, name);
    data.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    data.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
    data.extend_from_slice(&pieces);
    data.extend_from_slice(b"ee");
    data
}

/// How a scripted seeder behaves once it has unchoked the leecher.
#[derive(Debug, Clone, Copy)]
pub enum SeederScript {
    /// Serve every requested block faithfully.
    Serve,
    /// Serve this many blocks, then close the connection.
    DropAfterBlocks(usize),
    /// Serve blocks with their first byte flipped.
    Corrupt,
}

/// Spawn a seeder owning `content` that answers one incoming leecher:
/// handshake, full bitfield, unchoke, then blocks per the script.
pub async fn spawn_seeder(
    info_hash: [u8; 20],
    piece_length: usize,
    content: Vec<u8>,
    script: SeederScript,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let num_pieces = content.len().div_ceil(piece_length);

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut buf = [0u8; 68];
        if stream.read_exact(&mut buf).await.is_err() {
            return;
        }
        let Ok(remote) = Handshake::from_bytes(&buf) else {
            return;
        };
        if remote.info_hash != info_hash {
            return;
        }

        let reply = Handshake::new(info_hash, *b"-ST0001-scriptedseed");
        stream.write_all(&reply.to_bytes()).await.unwrap();

        let bitfield = Bitfield::full(num_pieces);
        stream
            .write_all(
                &PeerMessage::Bitfield {
                    bitfield: bitfield.as_bytes().to_vec(),
                }
                .to_bytes(),
            )
            .await
            .unwrap();
        stream
            .write_all(&PeerMessage::Unchoke.to_bytes())
            .await
            .unwrap();

        let mut served = 0usize;
        loop {
            let Some(message) = read_message(&mut stream).await else {
                return;
            };

            if let PeerMessage::Request { block } = message {
                if let SeederScript::DropAfterBlocks(limit) = script {
                    if served >= limit {
                        return; // closes the connection mid-piece
                    }
                }

                let start = block.piece_index as usize * piece_length + block.offset as usize;
                let end = (start + block.length as usize).min(content.len());
                let mut data = content[start..end].to_vec();

                if matches!(script, SeederScript::Corrupt) {
                    if let Some(byte) = data.first_mut() {
                        *byte ^= 0xff;
                    }
                }

                let reply = PeerMessage::Piece {
                    piece_index: block.piece_index,
                    offset: block.offset,
                    data,
                };
                if stream.write_all(&reply.to_bytes()).await.is_err() {
                    return;
                }
                served += 1;
            }
        }
    });

    addr
}

async fn read_message(stream: &mut TcpStream) -> Option<PeerMessage> {
    let mut length_buf = [0u8; 4];
    stream.read_exact(&mut length_buf).await.ok()?;
    let length = u32::from_be_bytes(length_buf) as usize;
    if length == 0 {
        return Some(PeerMessage::KeepAlive);
    }
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await.ok()?;
    PeerMessage::from_payload(&payload).ok()
}

/// Serve every request on `listener` with `body` and report request
/// lines. Good enough for a scripted tracker or IP echo endpoint.
pub fn serve_http(listener: TcpListener, body: Vec<u8>) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&body).await;
            });
        }
    });

    rx
}

/// A bencoded announce response with a compact peer list.
pub fn tracker_body(peers: &[SocketAddr], interval: u64) -> Vec<u8> {
    let mut compact = Vec::new();
    for addr in peers {
        if let IpAddr::V4(v4) = addr.ip() {
            compact.extend_from_slice(&v4.octets());
            compact.extend_from_slice(&addr.port().to_be_bytes());
        }
    }

    let mut body = format!("d8:intervali{}e5:peers{}:", interval, compact.len()).into_bytes();
    body.extend_from_slice(&compact);
    body.push(b'e');
    body
}
