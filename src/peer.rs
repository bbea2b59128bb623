//! # Peer Addresses
//!
//! Trackers answer announces with a compact peer list: a string of 6-byte
//! records, each holding an IPv4 address (4 bytes) and a TCP port (2
//! bytes), both in network byte order.

use anyhow::{bail, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;

const COMPACT_PEER_LEN: usize = 6;

/// The network address of a peer in the swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parses a compact peer list as returned by the tracker.
///
/// Any length that is not a multiple of 6 means the list is corrupt and
/// none of it can be trusted.
pub fn parse_peers(compact: &[u8]) -> Result<Vec<Peer>> {
    if compact.len() % COMPACT_PEER_LEN != 0 {
        bail!(
            "compact peer list is {} bytes, not a multiple of {}",
            compact.len(),
            COMPACT_PEER_LEN
        );
    }

    let mut peers = Vec::with_capacity(compact.len() / COMPACT_PEER_LEN);
    for record in compact.chunks_exact(COMPACT_PEER_LEN) {
        let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
        let mut cursor = Cursor::new(&record[4..]);
        let port = cursor.read_u16::<BigEndian>()?;
        peers.push(Peer { ip, port });
    }

    Ok(peers)
}
