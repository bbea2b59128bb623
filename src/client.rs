//! # Peer Session
//!
//! A [`Client`] is a connected, handshaked peer ready for piece traffic.
//! Establishing one walks a fixed lifecycle:
//!
//! 1. **Dial**: TCP connect with a short timeout.
//! 2. **Handshake**: exchange 68-byte handshakes; the remote's info hash
//!    must match the torrent being downloaded.
//! 3. **Bitfield**: the remote's first real message must be its bitfield.
//!    This simple client treats anything else, including an early
//!    keep-alive, as a protocol violation and drops the session.
//!
//! After that the session is ready: the owning worker sends `unchoke` and
//! `interested` and starts requesting blocks once the peer unchokes us.
//! The `choked` flag starts out true and only incoming messages flip it.
//!
//! Each session owns its socket exclusively; a session that fails is
//! dropped and never reused.

use crate::bitfield::Bitfield;
use crate::handshake::{read_handshake, Handshake};
use crate::message::{self, Message, MESSAGE_BITFIELD, MESSAGE_KEEPALIVE};
use crate::peer::Peer;

use anyhow::{anyhow, bail, Result};
use std::io::Write;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

/// A live session with one remote peer.
#[derive(Debug)]
pub struct Client {
    peer: Peer,
    conn: TcpStream,
    bitfield: Bitfield,
    choked: bool,
}

impl Client {
    /// Dials `peer` and runs the session lifecycle through the bitfield
    /// exchange. Any timeout, I/O failure or protocol violation along the
    /// way fails the whole connection attempt.
    pub fn connect(peer: Peer, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<Client> {
        let addr = SocketAddr::new(IpAddr::V4(peer.ip), peer.port);
        let conn = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)
            .map_err(|e| anyhow!("could not connect to {}: {}", peer, e))?;

        let mut client = Client {
            peer,
            conn,
            bitfield: Bitfield::default(),
            choked: true,
        };
        client.complete_handshake(info_hash, peer_id)?;
        client.recv_bitfield()?;

        Ok(client)
    }

    /// Whether the peer is currently refusing to serve our requests.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// Whether the peer advertises the piece at `index`.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Records an incoming `choke`.
    pub fn read_choke(&mut self) {
        debug!("{} choked us", self.peer);
        self.choked = true;
    }

    /// Records an incoming `unchoke`.
    pub fn read_unchoke(&mut self) {
        debug!("{} unchoked us", self.peer);
        self.choked = false;
    }

    /// Records an incoming `have` in the peer's bitfield.
    pub fn read_have(&mut self, message: &Message) -> Result<()> {
        let index = message::parse_have(message)?;
        self.bitfield.set_piece(index);
        Ok(())
    }

    /// Reads the next message from the peer, blocking until one arrives or
    /// the socket's read timeout expires.
    pub fn read_message(&mut self) -> Result<Message> {
        message::read_message(&mut self.conn)
    }

    /// Arms or clears the socket read timeout.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.conn.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send_unchoke(&mut self) -> Result<()> {
        self.send(&Message::new(message::MESSAGE_UNCHOKE))
    }

    pub fn send_interested(&mut self) -> Result<()> {
        self.send(&Message::new(message::MESSAGE_INTERESTED))
    }

    /// Tells the peer we now have the piece at `index`.
    pub fn send_have(&mut self, index: u32) -> Result<()> {
        self.send(&Message::have(index))
    }

    /// Requests `length` bytes at offset `begin` within piece `index`.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        self.send(&Message::request(index, begin, length))
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        // write_all loops over short writes until the frame is out
        self.conn
            .write_all(&message.serialize())
            .map_err(|e| anyhow!("could not send {} to {}: {}", message.name(), self.peer, e))
    }

    fn complete_handshake(&mut self, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<()> {
        self.conn.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        self.conn.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let handshake = Handshake::new(info_hash, peer_id);
        self.conn
            .write_all(&handshake.serialize())
            .map_err(|e| anyhow!("could not send handshake to {}: {}", self.peer, e))?;

        let reply = read_handshake(&mut self.conn)
            .map_err(|e| anyhow!("could not read handshake from {}: {}", self.peer, e))?;
        if reply.info_hash != info_hash {
            bail!("{} answered the handshake with a different info hash", self.peer);
        }

        self.conn.set_write_timeout(None)?;
        Ok(())
    }

    fn recv_bitfield(&mut self) -> Result<()> {
        self.conn.set_read_timeout(Some(BITFIELD_TIMEOUT))?;
        let message = message::read_message(&mut self.conn)
            .map_err(|e| anyhow!("could not read bitfield from {}: {}", self.peer, e))?;
        self.conn.set_read_timeout(None)?;

        if message.id == MESSAGE_KEEPALIVE {
            bail!("{} sent a keep-alive instead of its bitfield", self.peer);
        }
        if message.id != MESSAGE_BITFIELD {
            bail!(
                "{} sent {} instead of its bitfield",
                self.peer,
                message.name()
            );
        }

        self.bitfield = Bitfield::new(message.payload);
        Ok(())
    }
}
