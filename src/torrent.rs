//! # Torrent Metainfo
//!
//! A `.torrent` file is a bencoded dictionary describing a single file and
//! the tracker that coordinates its swarm:
//!
//! - **announce**: tracker URL
//! - **info.name**: suggested filename
//! - **info.piece length**: size of every piece but possibly the last
//! - **info.length**: total file size
//! - **info.pieces**: concatenated 20-byte SHA-1 piece hashes
//!
//! [`Metainfo`] is the parsed, validated form. It is built once and never
//! mutated; the download coordinator only reads from it.
//!
//! ## Info hash
//!
//! The swarm identifies a torrent by the SHA-1 of the bencoded `info`
//! value. The digest here is computed over the exact byte span of `info`
//! in the source file, so torrents that were not canonically encoded still
//! hash to the identity the rest of the swarm uses.

use crate::bencode::{self, Value};

use anyhow::{anyhow, bail, Result};
use boring::sha::Sha1;
use std::fs;
use std::time::Duration;
use url::Url;

const SHA1_HASH_SIZE: usize = 20;
const TORRENT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The parsed descriptor of a single-file torrent.
#[derive(Debug, Clone)]
pub struct Metainfo {
    announce: String,
    info_hash: [u8; 20],
    piece_hashes: Vec<[u8; 20]>,
    piece_length: u32,
    length: u64,
    name: String,
}

impl Metainfo {
    /// Loads a torrent from a filesystem path or an HTTP(S) URL.
    pub fn open(location: &str) -> Result<Metainfo> {
        let data = if location.starts_with("http://") || location.starts_with("https://") {
            fetch_torrent(location)?
        } else {
            fs::read(location)
                .map_err(|e| anyhow!("could not read torrent file {}: {}", location, e))?
        };
        Metainfo::from_bytes(&data)
    }

    /// Parses and validates the raw bytes of a torrent file.
    pub fn from_bytes(data: &[u8]) -> Result<Metainfo> {
        let root = bencode::decode(data).map_err(|e| anyhow!("could not decode torrent: {}", e))?;
        if root.as_dict().is_none() {
            bail!("torrent is not a bencoded dictionary");
        }

        let announce = root
            .lookup(b"announce")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("torrent is missing the announce field"))?
            .to_string();
        Url::parse(&announce)
            .map_err(|_| anyhow!("announce field is not a valid url: {}", announce))?;

        let info = root
            .lookup(b"info")
            .ok_or_else(|| anyhow!("torrent is missing the info dictionary"))?;
        if info.as_dict().is_none() {
            bail!("info field is not a dictionary");
        }

        let name = info
            .lookup(b"name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("info dictionary is missing the name field"))?
            .to_string();

        let piece_length = info
            .lookup(b"piece length")
            .and_then(Value::as_integer)
            .ok_or_else(|| anyhow!("info dictionary is missing the piece length field"))?;
        if piece_length <= 0 || piece_length > u32::MAX as i64 {
            bail!("piece length {} is out of range", piece_length);
        }
        let piece_length = piece_length as u32;

        let length = info
            .lookup(b"length")
            .and_then(Value::as_integer)
            .ok_or_else(|| anyhow!("info dictionary is missing the length field"))?;
        if length <= 0 {
            bail!("length {} is out of range", length);
        }
        let length = length as u64;

        let pieces = info
            .lookup(b"pieces")
            .and_then(Value::as_bytes)
            .ok_or_else(|| anyhow!("info dictionary is missing the pieces field"))?;
        if pieces.is_empty() || pieces.len() % SHA1_HASH_SIZE != 0 {
            bail!(
                "pieces field is {} bytes, not a nonzero multiple of {}",
                pieces.len(),
                SHA1_HASH_SIZE
            );
        }

        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(SHA1_HASH_SIZE)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let expected_pieces = length.div_ceil(piece_length as u64);
        if expected_pieces != piece_hashes.len() as u64 {
            bail!(
                "torrent declares {} bytes in {}-byte pieces but carries {} piece hashes",
                length,
                piece_length,
                piece_hashes.len()
            );
        }

        // Hash the info value exactly as it appears in the file.
        let raw_info = bencode::dict_entry_raw(data, b"info")?
            .ok_or_else(|| anyhow!("torrent is missing the info dictionary"))?;
        let mut hasher = Sha1::new();
        hasher.update(raw_info);
        let info_hash = hasher.finish();

        Ok(Metainfo {
            announce,
            info_hash,
            piece_hashes,
            piece_length,
            length,
            name,
        })
    }

    /// The tracker announce URL.
    pub fn announce(&self) -> &str {
        &self.announce
    }

    /// The 20-byte SHA-1 identifying this torrent in the swarm.
    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    /// The suggested output filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total file size in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Number of pieces in the torrent.
    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// The expected SHA-1 of the piece at `index`.
    pub fn piece_hash(&self, index: u32) -> [u8; 20] {
        self.piece_hashes[index as usize]
    }

    /// The byte range `[begin, end)` that the piece at `index` occupies in
    /// the output file; the final piece is clamped to the file length.
    pub fn piece_bounds(&self, index: u32) -> (u64, u64) {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);
        (begin, end)
    }

    /// The size in bytes of the piece at `index`.
    pub fn piece_size(&self, index: u32) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }
}

fn fetch_torrent(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(TORRENT_FETCH_TIMEOUT)
        .build()?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| anyhow!("could not fetch torrent from {}: {}", url, e))?;
    if !response.status().is_success() {
        bail!("torrent fetch from {} answered HTTP {}", url, response.status());
    }
    Ok(response.bytes()?.to_vec())
}
