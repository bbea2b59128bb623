//! # BitTorrent Handshake
//!
//! The handshake is the first frame exchanged on a fresh peer connection.
//! For the standard protocol it is exactly 68 bytes:
//!
//! ```text
//! <pstrlen=19><pstr="BitTorrent protocol"><reserved: 8 zero bytes><info_hash: 20><peer_id: 20>
//! ```
//!
//! Both sides send one; a session is only usable once the remote's info
//! hash has been checked against the torrent being downloaded. The eight
//! reserved bytes advertise protocol extensions and are ignored here.

use anyhow::{bail, Result};
use std::io::Read;

const PROTOCOL_ID: &str = "BitTorrent protocol";

/// The identifying fields of a peer handshake.
pub struct Handshake {
    /// 20-byte SHA-1 of the torrent's info dictionary.
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer.
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds a handshake for the standard protocol string.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake { info_hash, peer_id }
    }

    /// Serializes the handshake into its 68-byte wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(49 + PROTOCOL_ID.len());
        buf.push(PROTOCOL_ID.len() as u8);
        buf.extend_from_slice(PROTOCOL_ID.as_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }
}

/// Reads one handshake from `reader`.
///
/// The protocol-string length byte comes first, then that many protocol
/// bytes plus the 48 fixed trailing bytes. A zero length or a protocol
/// string other than `"BitTorrent protocol"` fails the read; checking the
/// info hash is left to the session, which knows the expected value.
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<Handshake> {
    let mut length = [0u8; 1];
    reader.read_exact(&mut length)?;
    let pstrlen = length[0] as usize;
    if pstrlen == 0 {
        bail!("handshake protocol string is empty");
    }

    let mut frame = vec![0u8; pstrlen + 48];
    reader.read_exact(&mut frame)?;

    if &frame[..pstrlen] != PROTOCOL_ID.as_bytes() {
        bail!("peer speaks an unknown protocol");
    }

    // frame[pstrlen..pstrlen + 8] holds the reserved bytes, ignored
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&frame[pstrlen + 8..pstrlen + 28]);
    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&frame[pstrlen + 28..pstrlen + 48]);

    Ok(Handshake { info_hash, peer_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_HASH: [u8; 20] = [
        134, 212, 200, 0, 36, 164, 105, 190, 76, 80, 188, 90, 16, 44, 247, 23, 128, 49, 0, 116,
    ];
    const PEER_ID: [u8; 20] = [
        45, 68, 69, 49, 51, 52, 48, 45, 106, 80, 199, 219, 129, 99, 14, 116, 226, 131, 207, 249,
    ];

    #[test]
    fn serialize_layout() {
        let handshake = Handshake::new(INFO_HASH, PEER_ID);
        let buf = handshake.serialize();

        let mut expected = vec![19u8];
        expected.extend_from_slice(b"BitTorrent protocol");
        expected.extend_from_slice(&[0u8; 8]);
        expected.extend_from_slice(&INFO_HASH);
        expected.extend_from_slice(&PEER_ID);

        assert_eq!(buf.len(), 68);
        assert_eq!(buf, expected);
    }

    #[test]
    fn round_trip() {
        let buf = Handshake::new(INFO_HASH, PEER_ID).serialize();
        let parsed = read_handshake(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.info_hash, INFO_HASH);
        assert_eq!(parsed.peer_id, PEER_ID);
    }

    #[test]
    fn reserved_bytes_are_ignored() {
        let mut buf = Handshake::new(INFO_HASH, PEER_ID).serialize();
        buf[20..28].copy_from_slice(&[0xff; 8]);
        let parsed = read_handshake(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.info_hash, INFO_HASH);
    }

    #[test]
    fn rejects_unknown_protocol() {
        let mut buf = Handshake::new(INFO_HASH, PEER_ID).serialize();
        buf[1..20].copy_from_slice(b"BitTorrent protocoL");
        assert!(read_handshake(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn rejects_empty_protocol_string() {
        let buf = [0u8; 49];
        assert!(read_handshake(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn rejects_truncated_frame() {
        let buf = Handshake::new(INFO_HASH, PEER_ID).serialize();
        assert!(read_handshake(&mut &buf[..40]).is_err());
    }
}
