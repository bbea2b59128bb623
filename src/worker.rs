//! # Download Worker
//!
//! One worker runs per discovered peer, in its own thread. It establishes
//! a session, then pulls piece jobs off the shared work queue and turns
//! them into verified results:
//!
//! 1. Skip (and requeue) pieces the peer does not advertise.
//! 2. Download the piece in pipelined 16 KiB block requests, keeping up
//!    to five requests in flight while the peer has us unchoked.
//! 3. Verify the piece against its SHA-1 and hand it to the coordinator,
//!    announcing it back to the peer with a `have`.
//!
//! A failed integrity check requeues the piece and moves on; a transport
//! error or deadline requeues the piece and ends the worker, since the
//! socket can no longer be trusted. Either way no piece is ever lost.

use crate::client::Client;
use crate::message::{
    self, MESSAGE_CHOKE, MESSAGE_HAVE, MESSAGE_KEEPALIVE, MESSAGE_PIECE, MESSAGE_UNCHOKE,
};
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};

use anyhow::{bail, Result};
use boring::sha::Sha1;
use crossbeam_channel::{Receiver, Sender};
use std::time::{Duration, Instant};

/// Largest block that may be requested in one `request` message.
pub const MAX_BLOCK_SIZE: u32 = 16_384;

/// Most block requests kept in flight per peer.
pub const MAX_BACKLOG: u32 = 5;

/// Wall-clock bound on a single piece attempt.
const PIECE_DEADLINE: Duration = Duration::from_secs(30);

/// Downloads pieces from a single peer.
pub struct Worker {
    peer: Peer,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    work: (Sender<PieceWork>, Receiver<PieceWork>),
    results: Sender<PieceResult>,
}

/// Transient state of one piece download attempt.
struct PieceProgress {
    buf: Vec<u8>,
    downloaded: u32,
    requested: u32,
    backlog: u32,
}

impl PieceProgress {
    fn new(length: u32) -> PieceProgress {
        PieceProgress {
            buf: vec![0; length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    /// Copies an incoming block into the piece buffer.
    fn on_block(&mut self, begin: u32, block: &[u8]) -> Result<()> {
        let begin = begin as usize;
        if begin >= self.buf.len() {
            bail!("block offset {} is past the end of the piece", begin);
        }
        if begin + block.len() > self.buf.len() {
            bail!(
                "block of {} bytes at offset {} overruns the piece",
                block.len(),
                begin
            );
        }

        self.buf[begin..begin + block.len()].copy_from_slice(block);
        self.downloaded += block.len() as u32;
        self.backlog = self.backlog.saturating_sub(1);
        Ok(())
    }
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work: (Sender<PieceWork>, Receiver<PieceWork>),
        results: Sender<PieceResult>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            work,
            results,
        }
    }

    /// Runs the worker until the peer fails or the work queue closes.
    pub fn run(&self) {
        let mut client = match Client::connect(self.peer.clone(), self.info_hash, self.peer_id) {
            Ok(client) => client,
            Err(e) => {
                debug!("dropping peer: {}", e);
                return;
            }
        };
        info!("completed handshake with {}", self.peer);

        if client.send_unchoke().is_err() {
            return;
        }
        if client.send_interested().is_err() {
            return;
        }

        while let Ok(piece_work) = self.work.1.recv() {
            if !client.has_piece(piece_work.index) {
                if self.work.0.send(piece_work).is_err() {
                    return;
                }
                continue;
            }

            let data = match self.download_piece(&mut client, &piece_work) {
                Ok(data) => data,
                Err(e) => {
                    debug!("abandoning {}: {}", self.peer, e);
                    let _ = self.work.0.send(piece_work);
                    return;
                }
            };

            if let Err(e) = check_integrity(&piece_work, &data) {
                warn!("{}", e);
                if self.work.0.send(piece_work).is_err() {
                    return;
                }
                continue;
            }

            debug!("downloaded piece {} from {}", piece_work.index, self.peer);
            if let Err(e) = client.send_have(piece_work.index) {
                debug!("{}", e);
            }

            let result = PieceResult::new(piece_work.index, data);
            if self.results.send(result).is_err() {
                return;
            }
        }
    }

    /// Downloads one piece, bounded by [`PIECE_DEADLINE`].
    fn download_piece(&self, client: &mut Client, piece_work: &PieceWork) -> Result<Vec<u8>> {
        let mut progress = PieceProgress::new(piece_work.length);
        let deadline = Instant::now() + PIECE_DEADLINE;

        client.set_read_timeout(Some(PIECE_DEADLINE))?;
        let outcome = self.exchange_blocks(client, piece_work, &mut progress, deadline);
        client.set_read_timeout(None)?;
        outcome?;

        Ok(progress.buf)
    }

    fn exchange_blocks(
        &self,
        client: &mut Client,
        piece_work: &PieceWork,
        progress: &mut PieceProgress,
        deadline: Instant,
    ) -> Result<()> {
        while progress.downloaded < piece_work.length {
            if Instant::now() >= deadline {
                bail!(
                    "piece {} timed out after {:?}",
                    piece_work.index,
                    PIECE_DEADLINE
                );
            }

            // Keep the request pipeline full while the peer serves us.
            if !client.is_choked() {
                while progress.backlog < MAX_BACKLOG && progress.requested < piece_work.length {
                    let block_size = MAX_BLOCK_SIZE.min(piece_work.length - progress.requested);
                    client.send_request(piece_work.index, progress.requested, block_size)?;
                    progress.backlog += 1;
                    progress.requested += block_size;
                }
            }

            let msg = client.read_message()?;
            match msg.id {
                MESSAGE_KEEPALIVE => {}
                MESSAGE_CHOKE => client.read_choke(),
                MESSAGE_UNCHOKE => client.read_unchoke(),
                MESSAGE_HAVE => client.read_have(&msg)?,
                MESSAGE_PIECE => {
                    let (begin, block) = message::parse_piece(piece_work.index, &msg)?;
                    progress.on_block(begin, block)?;
                }
                _ => debug!("ignoring {} from {}", msg.name(), self.peer),
            }
        }

        Ok(())
    }
}

/// Compares a downloaded piece against its expected SHA-1.
fn check_integrity(piece_work: &PieceWork, data: &[u8]) -> Result<()> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finish();

    if digest != piece_work.hash {
        bail!("piece {} failed its integrity check", piece_work.index);
    }
    Ok(())
}
