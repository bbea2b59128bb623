//! # HTTP Tracker Client
//!
//! Peer discovery happens through a single announce: one GET against the
//! torrent's tracker with the torrent identity and our transfer state in
//! the query string. The tracker answers with a bencoded dictionary
//! holding an advisory re-announce `interval` and a compact `peers`
//! string, or a `failure reason` explaining the refusal.
//!
//! The info hash and peer id are raw 20-byte strings, so the query is
//! assembled by hand with every byte percent-encoded rather than going
//! through a textual form encoder.

use crate::bencode::{self, Value};
use crate::peer::{self, Peer};
use crate::torrent::Metainfo;

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use url::Url;

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

/// A successful tracker announce.
#[derive(Debug)]
pub struct TrackerResponse {
    /// Advisory seconds between re-announces; kept for logging only since
    /// this client announces once per run.
    pub interval: u32,
    /// Peers currently in the swarm.
    pub peers: Vec<Peer>,
}

/// Announces to the torrent's tracker and returns the discovered peers.
pub fn request_peers(
    metainfo: &Metainfo,
    peer_id: [u8; 20],
    port: u16,
) -> Result<TrackerResponse> {
    let announce_url = build_announce_url(metainfo, &peer_id, port)?;
    debug!("announcing to {}", announce_url);

    let client = reqwest::blocking::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()?;
    let response = client
        .get(&announce_url)
        .send()
        .map_err(|e| anyhow!("could not reach tracker: {}", e))?;
    if !response.status().is_success() {
        bail!("tracker answered HTTP {}", response.status());
    }

    // Read the body to EOF; trackers may stream without a Content-Length.
    let body = response.bytes()?;
    parse_response(&body)
}

/// Builds the announce URL for a fresh download of `metainfo`.
pub fn build_announce_url(metainfo: &Metainfo, peer_id: &[u8; 20], port: u16) -> Result<String> {
    let base = Url::parse(metainfo.announce())
        .map_err(|_| anyhow!("could not parse tracker url {}", metainfo.announce()))?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}",
        percent_encode_binary(&metainfo.info_hash()),
        percent_encode_binary(peer_id),
        port,
        metainfo.length(),
    );

    let mut announce = base.to_string();
    announce.push(if announce.contains('?') { '&' } else { '?' });
    announce.push_str(&query);

    Ok(announce)
}

/// Each byte is encoded as %XX where XX is its hexadecimal value.
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }

    encoded
}

/// Parses the bencoded body of a tracker response.
pub fn parse_response(body: &[u8]) -> Result<TrackerResponse> {
    let value = bencode::decode(body)
        .map_err(|e| anyhow!("could not decode tracker response: {}", e))?;
    if value.as_dict().is_none() {
        bail!("tracker response is not a dictionary");
    }

    if let Some(reason) = value.lookup(b"failure reason").and_then(Value::as_bytes) {
        bail!(
            "tracker refused the announce: {}",
            String::from_utf8_lossy(reason)
        );
    }

    let interval = value
        .lookup(b"interval")
        .and_then(Value::as_integer)
        .ok_or_else(|| anyhow!("tracker response is missing the interval field"))?;
    let interval = u32::try_from(interval)
        .map_err(|_| anyhow!("tracker interval {} is out of range", interval))?;

    let compact = value
        .lookup(b"peers")
        .and_then(Value::as_bytes)
        .ok_or_else(|| anyhow!("tracker response is missing the peers field"))?;
    let peers = peer::parse_peers(compact)?;

    Ok(TrackerResponse { interval, peers })
}
