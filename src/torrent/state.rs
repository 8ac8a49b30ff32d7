//! Mutable state of a torrent
//!
//! Everything here lives behind the torrent-wide lock: the completion bitmap,
//! dirty chunks, file and piece priorities, and the demand range of every
//! registered reader.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::geometry::{self, ChunkRequest, PieceIndex, PieceRange};
use crate::storage::{Bitmap, DownloadState, PieceChunks, PiecePriority, PieceState};

/// Identifier of a registered reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(pub u64);

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader-{}", self.0)
    }
}

/// A reader's demand moved from one piece range to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandChange {
    pub reader: ReaderId,
    pub from: PieceRange,
    pub to: PieceRange,
}

/// State guarded by the torrent-wide lock
#[derive(Debug)]
pub struct TorrentState {
    piece_length: u64,
    total_length: u64,
    chunk_size: u32,
    completed: Bitmap,
    checking: Bitmap,
    chunks: Vec<PieceChunks>,
    file_extents: Vec<PieceRange>,
    file_priorities: Vec<PiecePriority>,
    piece_priorities: Vec<PiecePriority>,
    readers: HashMap<ReaderId, PieceRange>,
    demand_listeners: Vec<mpsc::UnboundedSender<DemandChange>>,
}

impl TorrentState {
    /// Create state for a torrent; `file_extents` are the overlapped piece
    /// ranges of each file in order
    pub fn new(
        piece_length: u64,
        total_length: u64,
        num_pieces: usize,
        chunk_size: u32,
        file_extents: Vec<PieceRange>,
    ) -> Self {
        let chunks = (0..num_pieces)
            .map(|i| PieceChunks::new(geometry::piece_len(i, piece_length, total_length), chunk_size))
            .collect();
        let file_priorities = vec![PiecePriority::None; file_extents.len()];
        Self {
            piece_length,
            total_length,
            chunk_size,
            completed: Bitmap::new(num_pieces),
            checking: Bitmap::new(num_pieces),
            chunks,
            file_extents,
            file_priorities,
            piece_priorities: vec![PiecePriority::None; num_pieces],
            readers: HashMap::new(),
            demand_listeners: Vec::new(),
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.completed.len()
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Completion bitmap
    pub fn completed(&self) -> &Bitmap {
        &self.completed
    }

    /// Check if a piece passed verification
    pub fn piece_complete(&self, index: PieceIndex) -> bool {
        self.completed.contains(index)
    }

    /// Current download state and priority of a piece
    pub fn piece_state(&self, index: PieceIndex) -> PieceState {
        let download = if self.completed.contains(index) {
            DownloadState::Complete
        } else if self.checking.contains(index) {
            DownloadState::Checking
        } else if self.chunks.get(index).is_some_and(|c| c.dirty_count() > 0) {
            DownloadState::Partial
        } else {
            DownloadState::Missing
        };
        PieceState {
            priority: self.piece_priority(index),
            download,
        }
    }

    /// Total bytes of completed pieces
    pub fn bytes_completed(&self) -> u64 {
        self.completed
            .iter()
            .map(|i| geometry::piece_len(i, self.piece_length, self.total_length))
            .sum()
    }

    /// Chunk covering an absolute torrent offset
    pub fn offset_request(&self, offset: u64) -> Option<ChunkRequest> {
        geometry::offset_request(offset, self.total_length, self.piece_length, self.chunk_size)
    }

    /// Absolute offset of a chunk's first byte
    pub fn request_offset(&self, request: &ChunkRequest) -> u64 {
        geometry::request_offset(request, self.piece_length)
    }

    /// Check if a chunk's bytes are stored, verified or not
    pub fn have_chunk(&self, request: &ChunkRequest) -> bool {
        if self.piece_complete(request.index) {
            return true;
        }
        self.chunks
            .get(request.index)
            .is_some_and(|c| c.has(request.chunk_index(self.chunk_size)))
    }

    /// Record a stored chunk. Returns true once every chunk of the piece is
    /// stored.
    pub fn mark_chunk(&mut self, request: &ChunkRequest) -> bool {
        let chunk_size = self.chunk_size;
        match self.chunks.get_mut(request.index) {
            Some(chunks) => {
                chunks.mark(request.chunk_index(chunk_size));
                chunks.is_complete()
            }
            None => false,
        }
    }

    /// Flag a piece as being verified
    pub fn set_checking(&mut self, index: PieceIndex, checking: bool) {
        if checking {
            self.checking.insert(index);
        } else {
            self.checking.remove(index);
        }
    }

    /// Store the verification result of a piece, returning true if the
    /// completion state changed.
    ///
    /// An incomplete piece that was complete before, or whose chunks were all
    /// stored, must be fetched again, so its dirty chunks are forgotten.
    pub fn set_completion(&mut self, index: PieceIndex, complete: bool) -> bool {
        self.checking.remove(index);
        let changed = if complete {
            self.completed.insert(index)
        } else {
            let demoted = self.completed.remove(index);
            if let Some(chunks) = self.chunks.get_mut(index) {
                if demoted || chunks.is_complete() {
                    chunks.clear();
                }
            }
            demoted
        };
        if changed {
            debug!("Piece {} complete: {}", index, complete);
            self.update_piece_priorities(PieceRange::new(index, index + 1));
        }
        changed
    }

    /// Minimum priority requested for a file
    pub fn file_priority(&self, file: usize) -> PiecePriority {
        self.file_priorities.get(file).copied().unwrap_or_default()
    }

    /// Set the priority of a file, returning true if it changed
    pub fn set_file_priority(&mut self, file: usize, priority: PiecePriority) -> bool {
        match self.file_priorities.get_mut(file) {
            Some(current) if *current != priority => {
                *current = priority;
                true
            }
            _ => false,
        }
    }

    /// Effective scheduling priority of a piece
    pub fn piece_priority(&self, index: PieceIndex) -> PiecePriority {
        self.piece_priorities.get(index).copied().unwrap_or_default()
    }

    /// Recompute the effective priority of every piece in `range`
    pub fn update_piece_priorities(&mut self, range: PieceRange) {
        let end = range.end.min(self.num_pieces());
        for index in range.begin..end.max(range.begin) {
            let priority = self.compute_priority(index);
            self.piece_priorities[index] = priority;
        }
        trace!("Updated piece priorities for {}", range);
    }

    fn compute_priority(&self, index: PieceIndex) -> PiecePriority {
        if self.completed.contains(index) {
            return PiecePriority::None;
        }
        let files = self
            .file_extents
            .iter()
            .zip(&self.file_priorities)
            .filter(|(extent, _)| extent.contains(index))
            .map(|(_, &priority)| priority);
        let readers = self.readers.values().filter(|r| r.contains(index)).map(|r| {
            if index == r.begin {
                PiecePriority::Now
            } else if index == r.begin + 1 {
                PiecePriority::Next
            } else {
                PiecePriority::Readahead
            }
        });
        files.chain(readers).max().unwrap_or_default()
    }

    /// Register a reader with no demand
    pub fn add_reader(&mut self, id: ReaderId) {
        self.readers.insert(id, PieceRange::default());
        debug!("Registered {} ({} readers)", id, self.readers.len());
    }

    /// Deregister a reader and retract its demand. Returns false if the
    /// reader was not registered.
    pub fn delete_reader(&mut self, id: ReaderId) -> bool {
        let Some(range) = self.readers.remove(&id) else {
            return false;
        };
        debug!("Deregistered {} ({} readers)", id, self.readers.len());
        if !range.is_empty() {
            self.update_piece_priorities(range);
            self.publish(DemandChange {
                reader: id,
                from: range,
                to: PieceRange::default(),
            });
        }
        true
    }

    /// Apply a change of a reader's demand
    pub fn reader_pos_changed(&mut self, id: ReaderId, from: PieceRange, to: PieceRange) {
        if from == to {
            return;
        }
        match self.readers.get_mut(&id) {
            Some(range) => *range = to,
            None => return,
        }
        if from.is_disjoint(&to) {
            self.update_piece_priorities(from);
            self.update_piece_priorities(to);
        } else {
            self.update_piece_priorities(from.union(&to));
        }
        trace!("{} demand {} -> {}", id, from, to);
        self.publish(DemandChange { reader: id, from, to });
    }

    /// Current demand of a registered reader
    pub fn reader_demand(&self, id: ReaderId) -> Option<PieceRange> {
        self.readers.get(&id).copied()
    }

    /// Number of registered readers
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Receive every demand change from now on
    pub fn subscribe_demand(&mut self) -> mpsc::UnboundedReceiver<DemandChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.demand_listeners.push(tx);
        rx
    }

    fn publish(&mut self, change: DemandChange) {
        self.demand_listeners.retain(|tx| tx.send(change).is_ok());
    }
}
