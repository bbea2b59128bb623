//! # Peer Wire Messages
//!
//! Every message after the handshake is length-prefixed:
//!
//! ```text
//! <length: u32 big-endian><id: u8><payload: length - 1 bytes>
//! ```
//!
//! A length of 0 is a keep-alive and carries neither id nor payload.
//!
//! | ID | Name           | Payload                                    |
//! |----|----------------|--------------------------------------------|
//! | 0  | choke          | none                                       |
//! | 1  | unchoke        | none                                       |
//! | 2  | interested     | none                                       |
//! | 3  | not interested | none                                       |
//! | 4  | have           | piece index (u32)                          |
//! | 5  | bitfield       | availability bitmap                        |
//! | 6  | request        | index, begin, length (u32 each)            |
//! | 7  | piece          | index, begin (u32 each), then block bytes  |
//! | 8  | cancel         | index, begin, length (u32 each)            |

use anyhow::{bail, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

pub type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
#[allow(dead_code)]
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
#[allow(dead_code)]
pub const MESSAGE_CANCEL: MessageId = 8;
/// In-process id for the zero-length keep-alive frame; never on the wire.
pub const MESSAGE_KEEPALIVE: MessageId = 255;

/// A single peer wire message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a payload-less message.
    pub fn new(id: MessageId) -> Message {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Builds a message carrying `payload`.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Message {
        Message { id, payload }
    }

    /// Builds a `have` message announcing the piece at `index`.
    pub fn have(index: u32) -> Message {
        Message::new_with_payload(MESSAGE_HAVE, index.to_be_bytes().to_vec())
    }

    /// Builds a `request` for `length` bytes at `begin` within piece `index`.
    pub fn request(index: u32, begin: u32, length: u32) -> Message {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        Message::new_with_payload(MESSAGE_REQUEST, payload)
    }

    /// Builds a `piece` message carrying `block` at `begin` within piece `index`.
    #[allow(dead_code)]
    pub fn piece(index: u32, begin: u32, block: &[u8]) -> Message {
        let mut payload = Vec::with_capacity(8 + block.len());
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(block);
        Message::new_with_payload(MESSAGE_PIECE, payload)
    }

    /// Builds a `cancel` for a previously sent request.
    #[allow(dead_code)]
    pub fn cancel(index: u32, begin: u32, length: u32) -> Message {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        Message::new_with_payload(MESSAGE_CANCEL, payload)
    }

    /// Serializes the message with its length prefix.
    pub fn serialize(&self) -> Vec<u8> {
        if self.id == MESSAGE_KEEPALIVE {
            return vec![0; 4];
        }
        let length = self.payload.len() as u32 + 1;
        let mut buf = Vec::with_capacity(4 + length as usize);
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(self.id);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// A short name for log lines.
    pub fn name(&self) -> &'static str {
        match self.id {
            MESSAGE_CHOKE => "choke",
            MESSAGE_UNCHOKE => "unchoke",
            MESSAGE_INTERESTED => "interested",
            MESSAGE_NOT_INTERESTED => "not interested",
            MESSAGE_HAVE => "have",
            MESSAGE_BITFIELD => "bitfield",
            MESSAGE_REQUEST => "request",
            MESSAGE_PIECE => "piece",
            MESSAGE_CANCEL => "cancel",
            MESSAGE_KEEPALIVE => "keep-alive",
            _ => "unknown",
        }
    }
}

/// Reads one length-prefixed message from `reader`.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message> {
    let length = reader.read_u32::<BigEndian>()? as usize;
    if length == 0 {
        return Ok(Message::new(MESSAGE_KEEPALIVE));
    }

    let mut frame = vec![0u8; length];
    reader.read_exact(&mut frame)?;

    let payload = frame.split_off(1);
    Ok(Message::new_with_payload(frame[0], payload))
}

/// Extracts the piece index from a `have` message.
pub fn parse_have(message: &Message) -> Result<u32> {
    if message.id != MESSAGE_HAVE {
        bail!("expected a have message but got {}", message.name());
    }
    if message.payload.len() != 4 {
        bail!(
            "have payload is {} bytes instead of 4",
            message.payload.len()
        );
    }
    let mut cursor = Cursor::new(&message.payload);
    Ok(cursor.read_u32::<BigEndian>()?)
}

/// Extracts the block offset and data from a `piece` message.
///
/// The embedded piece index must match `expected_index`; a peer answering
/// with some other piece is treated as a protocol violation.
pub fn parse_piece(expected_index: u32, message: &Message) -> Result<(u32, &[u8])> {
    if message.id != MESSAGE_PIECE {
        bail!("expected a piece message but got {}", message.name());
    }
    if message.payload.len() < 8 {
        bail!(
            "piece payload is too short ({} bytes)",
            message.payload.len()
        );
    }
    let mut cursor = Cursor::new(&message.payload[..8]);
    let index = cursor.read_u32::<BigEndian>()?;
    if index != expected_index {
        bail!(
            "peer sent piece {} while piece {} was expected",
            index,
            expected_index
        );
    }
    let begin = cursor.read_u32::<BigEndian>()?;
    Ok((begin, &message.payload[8..]))
}
