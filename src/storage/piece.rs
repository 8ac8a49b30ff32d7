//! Piece bookkeeping
//!
//! Per-piece download state, scheduling priority and dirty chunk tracking.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::chunks_in_piece;

/// Scheduling priority of a piece. Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PiecePriority {
    /// Not wanted
    None,
    /// Wanted as part of a selected file
    Normal,
    /// Wanted before normal pieces
    High,
    /// Inside some reader's readahead window
    Readahead,
    /// The piece right after a reader's current piece
    Next,
    /// The piece a reader is currently positioned in
    Now,
}

impl Default for PiecePriority {
    fn default() -> Self {
        PiecePriority::None
    }
}

/// Download status of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    /// No chunk of the piece is stored
    Missing,
    /// Some chunks are stored
    Partial,
    /// Every chunk is stored and the piece is being verified
    Checking,
    /// The piece passed verification
    Complete,
}

impl Default for DownloadState {
    fn default() -> Self {
        DownloadState::Missing
    }
}

/// Observable state of one piece
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceState {
    pub priority: PiecePriority,
    pub download: DownloadState,
}

impl PieceState {
    /// Check if the piece passed verification
    pub fn is_complete(&self) -> bool {
        self.download == DownloadState::Complete
    }
}

/// Chunks of a piece that have been written to storage but not necessarily
/// verified
#[derive(Debug, Clone)]
pub struct PieceChunks {
    dirty: BitVec,
}

impl PieceChunks {
    /// Create tracking for a piece of `piece_len` bytes split into chunks
    pub fn new(piece_len: u64, chunk_size: u32) -> Self {
        Self {
            dirty: bitvec![0; chunks_in_piece(piece_len, chunk_size)],
        }
    }

    /// Record a stored chunk, returning true if it was new
    pub fn mark(&mut self, chunk: usize) -> bool {
        if chunk >= self.dirty.len() {
            return false;
        }
        !self.dirty.replace(chunk, true)
    }

    /// Check if a chunk is stored
    pub fn has(&self, chunk: usize) -> bool {
        self.dirty.get(chunk).is_some_and(|bit| *bit)
    }

    /// Check if every chunk is stored
    pub fn is_complete(&self) -> bool {
        self.dirty.all()
    }

    /// Number of stored chunks
    pub fn dirty_count(&self) -> usize {
        self.dirty.count_ones()
    }

    /// Forget every stored chunk
    pub fn clear(&mut self) {
        self.dirty.fill(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(PiecePriority::Now > PiecePriority::Next);
        assert!(PiecePriority::Next > PiecePriority::Readahead);
        assert!(PiecePriority::Readahead > PiecePriority::High);
        assert!(PiecePriority::High > PiecePriority::Normal);
        assert!(PiecePriority::Normal > PiecePriority::None);
        assert_eq!(PiecePriority::default(), PiecePriority::None);
    }

    #[test]
    fn test_download_state_default() {
        assert_eq!(DownloadState::default(), DownloadState::Missing);
        assert!(!PieceState::default().is_complete());
    }

    #[test]
    fn test_piece_chunks() {
        let mut chunks = PieceChunks::new(40, 16);
        assert!(!chunks.is_complete());

        assert!(chunks.mark(0));
        assert!(!chunks.mark(0));
        assert!(chunks.mark(2));
        assert!(!chunks.has(1));
        assert!(!chunks.mark(3));
        assert_eq!(chunks.dirty_count(), 2);

        chunks.mark(1);
        assert!(chunks.is_complete());

        chunks.clear();
        assert_eq!(chunks.dirty_count(), 0);
        assert!(!chunks.has(1));
    }

    #[test]
    fn test_piece_state_serializes() {
        let state = PieceState {
            priority: PiecePriority::Now,
            download: DownloadState::Partial,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"priority":"Now","download":"Partial"}"#);
    }
}
