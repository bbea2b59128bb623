//! # Piece Jobs and Results
//!
//! The coordinator seeds the work queue with one [`PieceWork`] per piece.
//! Workers turn jobs into [`PieceResult`]s after hash verification, or put
//! them back on the queue when a download attempt fails.

/// One piece waiting to be downloaded.
#[derive(Debug, Clone)]
pub struct PieceWork {
    /// Zero-based index of the piece within the torrent.
    pub index: u32,
    /// Expected SHA-1 of the piece data.
    pub hash: [u8; 20],
    /// Size of this piece in bytes; only the last piece may be short.
    pub length: u32,
}

/// A fully downloaded and verified piece.
#[derive(Debug, Clone)]
pub struct PieceResult {
    /// Zero-based index of the piece within the torrent.
    pub index: u32,
    /// The verified piece bytes.
    pub data: Vec<u8>,
}

impl PieceWork {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
        }
    }
}

impl PieceResult {
    pub fn new(index: u32, data: Vec<u8>) -> PieceResult {
        PieceResult { index, data }
    }
}
