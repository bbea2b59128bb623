//! # Download Coordinator
//!
//! The coordinator owns the two channels the swarm runs on:
//!
//! - a **work queue**, bounded to the piece count and pre-seeded with one
//!   job per piece in index order. Workers take jobs from it and put them
//!   back on failure, so a job is always either queued or held by a live
//!   worker and the queue can never overflow;
//! - a **result stream** carrying verified pieces back, in whatever order
//!   the swarm produces them.
//!
//! One worker thread is spawned per peer and never restarted. The
//! coordinator keeps no handle to them; it simply collects results until
//! every piece has arrived, writing each into the output image at its
//! computed offset.
//!
//! The coordinator holds no result sender of its own, so when every
//! worker has exited the result stream disconnects. That turns the
//! all-peers-died case into an immediate error instead of an unbounded
//! wait for pieces that can no longer arrive.

use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::torrent::Metainfo;
use crate::tracker;
use crate::worker::Worker;

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use std::thread;

/// Port advertised to the tracker. This client never listens, but the
/// announce requires one.
const PORT: u16 = 6881;

/// A torrent ready to download: metainfo plus the peers discovered for it.
pub struct Downloader {
    metainfo: Metainfo,
    peer_id: [u8; 20],
    peers: Vec<Peer>,
}

impl Downloader {
    /// Announces to the tracker and prepares a download over the peers it
    /// returned.
    pub fn new(metainfo: Metainfo) -> Result<Downloader> {
        let mut peer_id = [0u8; 20];
        rand::thread_rng().fill(&mut peer_id[..]);

        let response = tracker::request_peers(&metainfo, peer_id, PORT)?;
        debug!("tracker suggests re-announcing every {}s", response.interval);
        if response.peers.is_empty() {
            bail!("tracker returned no peers");
        }
        info!("found {} peers", response.peers.len());

        Ok(Downloader::with_peers(metainfo, peer_id, response.peers))
    }

    /// Prepares a download over an already known peer list.
    pub fn with_peers(metainfo: Metainfo, peer_id: [u8; 20], peers: Vec<Peer>) -> Downloader {
        Downloader {
            metainfo,
            peer_id,
            peers,
        }
    }

    /// Downloads the whole file and returns its assembled bytes.
    pub fn run(&self) -> Result<Vec<u8>> {
        let num_pieces = self.metainfo.num_pieces();
        info!(
            "downloading {:?} ({} pieces from {} peers)",
            self.metainfo.name(),
            num_pieces,
            self.peers.len()
        );

        let (work_tx, work_rx) = bounded::<PieceWork>(num_pieces);
        let (result_tx, result_rx) = unbounded::<PieceResult>();

        // Seed every piece job; capacity matches, so none of these block.
        for index in 0..num_pieces as u32 {
            let job = PieceWork::new(
                index,
                self.metainfo.piece_hash(index),
                self.metainfo.piece_size(index),
            );
            work_tx
                .send(job)
                .map_err(|_| anyhow!("could not seed the work queue"))?;
        }

        for peer in &self.peers {
            let worker = Worker::new(
                peer.clone(),
                self.peer_id,
                self.metainfo.info_hash(),
                (work_tx.clone(), work_rx.clone()),
                result_tx.clone(),
            );
            thread::spawn(move || worker.run());
        }
        // Only workers hold result senders now: if they all exit early the
        // stream disconnects instead of leaving the collection loop waiting
        // for pieces that can no longer arrive.
        drop(result_tx);

        let progress = ProgressBar::new(self.metainfo.length());
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut image = vec![0u8; self.metainfo.length() as usize];
        let mut completed = 0;
        while completed < num_pieces {
            let result = result_rx.recv().map_err(|_| {
                anyhow!(
                    "all peer connections failed with {} of {} pieces downloaded",
                    completed,
                    num_pieces
                )
            })?;

            let (begin, end) = self.metainfo.piece_bounds(result.index);
            image[begin as usize..end as usize].copy_from_slice(&result.data);
            progress.inc(result.data.len() as u64);
            completed += 1;
        }
        progress.finish_and_clear();

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, Value};
    use crate::handshake::{read_handshake, Handshake};
    use crate::message::{self, Message, MESSAGE_BITFIELD, MESSAGE_REQUEST, MESSAGE_UNCHOKE};
    use boring::sha::Sha1;
    use byteorder::{BigEndian, ReadBytesExt};
    use std::collections::BTreeMap;
    use std::io::{Cursor, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    fn sha1(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finish()
    }

    fn build_metainfo(file: &[u8], piece_length: usize, announce: &str) -> Metainfo {
        let mut pieces = Vec::new();
        for chunk in file.chunks(piece_length) {
            pieces.extend_from_slice(&sha1(chunk));
        }

        let mut info = BTreeMap::new();
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));
        info.insert(
            b"piece length".to_vec(),
            Value::Integer(piece_length as i64),
        );
        info.insert(b"length".to_vec(), Value::Integer(file.len() as i64));
        info.insert(b"name".to_vec(), Value::Bytes(b"blob.bin".to_vec()));

        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::Bytes(announce.as_bytes().to_vec()),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));

        Metainfo::from_bytes(&encode(&Value::Dict(root))).unwrap()
    }

    /// Serves one announce: answers any GET with a bencoded response
    /// pointing at `peer`.
    fn spawn_stub_tracker(listener: TcpListener, peer: &Peer) {
        let mut compact = Vec::with_capacity(6);
        compact.extend_from_slice(&peer.ip.octets());
        compact.extend_from_slice(&peer.port.to_be_bytes());

        let mut dict = BTreeMap::new();
        dict.insert(b"interval".to_vec(), Value::Integer(1800));
        dict.insert(b"peers".to_vec(), Value::Bytes(compact));
        let body = encode(&Value::Dict(dict));

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 2048];
            let _ = std::io::Read::read(&mut stream, &mut request).unwrap();
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
    }

    /// Serves one swarm member: answers the handshake, advertises
    /// `bitfield`, unchokes and then serves block requests out of `file`.
    fn spawn_stub_peer(
        listener: TcpListener,
        info_hash: [u8; 20],
        bitfield: Vec<u8>,
        file: Vec<u8>,
        piece_length: usize,
    ) {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let incoming = read_handshake(&mut stream).unwrap();
            assert_eq!(incoming.info_hash, info_hash);
            let reply = Handshake::new(info_hash, [0x42; 20]);
            stream.write_all(&reply.serialize()).unwrap();

            stream
                .write_all(&Message::new_with_payload(MESSAGE_BITFIELD, bitfield).serialize())
                .unwrap();
            stream
                .write_all(&Message::new(MESSAGE_UNCHOKE).serialize())
                .unwrap();

            // Serve requests until the other side goes away.
            while let Ok(msg) = message::read_message(&mut stream) {
                if msg.id != MESSAGE_REQUEST {
                    continue;
                }
                let mut cursor = Cursor::new(&msg.payload);
                let index = cursor.read_u32::<BigEndian>().unwrap() as usize;
                let begin = cursor.read_u32::<BigEndian>().unwrap() as usize;
                let length = cursor.read_u32::<BigEndian>().unwrap() as usize;

                let offset = index * piece_length + begin;
                let block = &file[offset..offset + length];
                let piece = Message::piece(index as u32, begin as u32, block);
                stream.write_all(&piece.serialize()).unwrap();
            }
        });
    }

    fn local_peer(listener: &TcpListener) -> Peer {
        Peer {
            ip: Ipv4Addr::LOCALHOST,
            port: listener.local_addr().unwrap().port(),
        }
    }

    #[test]
    fn downloads_a_file_from_a_stub_swarm() {
        let piece_length = 32;
        let file: Vec<u8> = (0..48u32).map(|i| (i * 7 % 251) as u8).collect();
        let metainfo = build_metainfo(&file, piece_length, "http://127.0.0.1:1/announce");
        let info_hash = metainfo.info_hash();

        // Two peers, each advertising only one of the two pieces, so the
        // workers also exercise the requeue-on-unavailable path.
        let first = TcpListener::bind("127.0.0.1:0").unwrap();
        let second = TcpListener::bind("127.0.0.1:0").unwrap();
        let peers = vec![local_peer(&first), local_peer(&second)];
        spawn_stub_peer(first, info_hash, vec![0b1000_0000], file.clone(), piece_length);
        spawn_stub_peer(second, info_hash, vec![0b0100_0000], file.clone(), piece_length);

        let downloader = Downloader::with_peers(metainfo, [0x07; 20], peers);
        let image = downloader.run().unwrap();
        assert_eq!(image, file);
    }

    #[test]
    fn downloads_end_to_end_through_a_stub_tracker() {
        let piece_length = 32;
        let file: Vec<u8> = (0..80u32).map(|i| (i * 13 % 241) as u8).collect();

        let peer_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = local_peer(&peer_listener);
        let tracker_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let announce = format!(
            "http://127.0.0.1:{}/announce",
            tracker_listener.local_addr().unwrap().port()
        );
        spawn_stub_tracker(tracker_listener, &peer);

        let metainfo = build_metainfo(&file, piece_length, &announce);
        // One peer with every piece: 3 pieces of 32, 32 and 16 bytes.
        spawn_stub_peer(
            peer_listener,
            metainfo.info_hash(),
            vec![0b1110_0000],
            file.clone(),
            piece_length,
        );

        let downloader = Downloader::new(metainfo).unwrap();
        let image = downloader.run().unwrap();
        assert_eq!(image, file);
    }

    #[test]
    fn fails_instead_of_hanging_when_every_peer_dies() {
        let file: Vec<u8> = vec![0xaa; 64];
        let metainfo = build_metainfo(&file, 32, "http://127.0.0.1:1/announce");

        // A listener that accepts and immediately drops the connection, so
        // the only worker dies during the handshake.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = local_peer(&listener);
        thread::spawn(move || {
            let _ = listener.accept();
        });

        let downloader = Downloader::with_peers(metainfo, [0x07; 20], vec![peer]);
        let err = downloader.run().unwrap_err();
        assert!(err.to_string().contains("0 of 2 pieces"));
    }
}
