use super::Pieces;
use crate::bencode::{dict_value_span, BencodeValue};
use crate::error::{Result, TorgetError};
use sha1::{Digest, Sha1};

/// One file of the torrent payload, as relative path components.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// The parsed `info` dictionary.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes in each piece
    pub piece_length: u64,
    /// SHA1 hashes of all pieces
    pub pieces: Pieces,
    /// Files in the torrent, in payload order
    pub files: Vec<FileInfo>,
    /// Whether the torrent declared a `files` list (multi-file mode)
    pub multi_file: bool,
    /// Total length of all files
    pub total_length: u64,
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| TorgetError::InvalidTorrent("Info must be a dict".to_string()))?;

        let name = dict
            .get(b"name".as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorgetError::InvalidTorrent("Missing 'name' field".to_string()))?
            .to_string();

        let piece_length = dict
            .get(b"piece length".as_ref())
            .and_then(|v| v.as_int())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                TorgetError::InvalidTorrent("Missing or invalid 'piece length'".to_string())
            })? as u64;

        let pieces_bytes = dict
            .get(b"pieces".as_ref())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| TorgetError::InvalidTorrent("Missing 'pieces' field".to_string()))?;

        let pieces = Pieces::from_bytes(pieces_bytes)?;

        // Single-file mode carries `length`; multi-file mode carries `files`.
        let (files, multi_file, total_length) =
            if let Some(length_value) = dict.get(b"length".as_ref()) {
                let length = length_value.as_int().filter(|&n| n >= 0).ok_or_else(|| {
                    TorgetError::InvalidTorrent("Invalid 'length' field".to_string())
                })? as u64;

                let file = FileInfo {
                    path: vec![name.clone()],
                    length,
                };

                (vec![file], false, length)
            } else if let Some(files_value) = dict.get(b"files".as_ref()) {
                let files_list = files_value.as_list().ok_or_else(|| {
                    TorgetError::InvalidTorrent("Invalid 'files' field".to_string())
                })?;

                let mut files = Vec::new();
                let mut total = 0u64;

                for file_value in files_list {
                    let file_dict = file_value.as_dict().ok_or_else(|| {
                        TorgetError::InvalidTorrent("File entry must be a dict".to_string())
                    })?;

                    let length = file_dict
                        .get(b"length".as_ref())
                        .and_then(|v| v.as_int())
                        .filter(|&n| n >= 0)
                        .ok_or_else(|| {
                            TorgetError::InvalidTorrent("Missing file 'length'".to_string())
                        })? as u64;

                    let path_list = file_dict
                        .get(b"path".as_ref())
                        .and_then(|v| v.as_list())
                        .filter(|l| !l.is_empty())
                        .ok_or_else(|| {
                            TorgetError::InvalidTorrent("Missing file 'path'".to_string())
                        })?;

                    let path = path_list
                        .iter()
                        .map(|v| {
                            v.as_str()
                                .filter(|s| !s.is_empty())
                                .ok_or_else(|| {
                                    TorgetError::InvalidTorrent(
                                        "Invalid path component".to_string(),
                                    )
                                })
                                .map(String::from)
                        })
                        .collect::<Result<Vec<_>>>()?;

                    total += length;
                    files.push(FileInfo { path, length });
                }

                (files, true, total)
            } else {
                return Err(TorgetError::InvalidTorrent(
                    "Missing 'length' or 'files' field".to_string(),
                ));
            };

        // The hashes must cover the whole payload.
        if (pieces.len() as u64) * piece_length < total_length {
            return Err(TorgetError::InvalidTorrent(format!(
                "{} pieces of {} bytes cannot cover {} bytes",
                pieces.len(),
                piece_length,
                total_length
            )));
        }

        Ok(TorrentInfo {
            name,
            piece_length,
            pieces,
            files,
            multi_file,
            total_length,
        })
    }
}

/// Top-level metadata from a .torrent file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Additional tracker tiers (optional)
    pub announce_list: Option<Vec<Vec<String>>>,
    /// The parsed info dictionary
    pub info: TorrentInfo,
    /// SHA1 over the raw bencoded bytes of the info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(value: BencodeValue, raw_data: &[u8]) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| TorgetError::InvalidTorrent("Torrent must be a dict".to_string()))?;

        let announce = dict
            .get(b"announce".as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorgetError::InvalidTorrent("Missing 'announce' field".to_string()))?
            .to_string();

        let announce_list = dict.get(b"announce-list".as_ref()).and_then(|v| {
            v.as_list().map(|list| {
                list.iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
        });

        let info_value = dict
            .get(b"info".as_ref())
            .ok_or_else(|| TorgetError::InvalidTorrent("Missing 'info' field".to_string()))?;

        let info = TorrentInfo::from_bencode(info_value)?;
        let info_hash = calculate_info_hash(raw_data)?;

        Ok(Metainfo {
            announce,
            announce_list,
            info,
            info_hash,
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Every announce URL the torrent names: `announce` plus each tier of
    /// `announce-list`, deduplicated, in order of first appearance.
    pub fn tracker_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        let mut push = |url: &str| {
            if !url.is_empty() && !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        };

        push(&self.announce);
        if let Some(tiers) = &self.announce_list {
            for tier in tiers {
                for url in tier {
                    push(url);
                }
            }
        }

        urls
    }
}

/// SHA1 over the info value exactly as it appears in the source bytes.
///
/// Re-serializing the decoded dictionary would canonicalize key order and
/// change the digest for torrents with non-canonical `info` encodings.
fn calculate_info_hash(raw_data: &[u8]) -> Result<[u8; 20]> {
    let span = dict_value_span(raw_data, b"info")?
        .ok_or_else(|| TorgetError::InvalidTorrent("Info dict not found".to_string()))?;

    let mut hasher = Sha1::new();
    hasher.update(&raw_data[span]);
    let hash = hasher.finalize();

    let mut result = [0u8; 20];
    result.copy_from_slice(&hash);
    Ok(result)
}
