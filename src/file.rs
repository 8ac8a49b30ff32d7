//! File views
//!
//! A `File` projects one declared file of a torrent onto the torrent's piece
//! space. It answers how much of the file is downloaded, breaks the file down
//! per piece, carries a minimum priority for the file's pieces and opens
//! readers over the file's bytes.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::geometry::{self, PieceIndex, PieceRange};
use crate::reader::{Readahead, Reader};
use crate::storage::{Bitmap, PiecePriority, PieceState};
use crate::torrent::{FileLayout, Shared};

/// Bytes of a file inside one piece, with that piece's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilePieceState {
    pub bytes: u64,
    pub state: PieceState,
}

/// Bytes of `[offset, offset + length)` not yet covered by completed pieces.
///
/// `first` and `end` are the overlapped piece range of the file. Boundary
/// pieces count only the bytes of the file inside them; middle pieces are
/// counted from the bitmap in one pass over its words.
pub fn file_bytes_left(
    usual_piece_size: u64,
    first: PieceIndex,
    end: PieceIndex,
    offset: u64,
    length: u64,
    completed: &Bitmap,
) -> u64 {
    let span = end.saturating_sub(first);
    match span {
        0 => 0,
        1 => {
            if completed.contains(first) {
                0
            } else {
                length
            }
        }
        _ => {
            let mut left = 0;
            if !completed.contains(first) {
                left += usual_piece_size - offset % usual_piece_size;
            }
            if !completed.contains(end - 1) {
                left += offset + length - (end as u64 - 1) * usual_piece_size;
            }
            let middle_complete = completed.count_range(first + 1..end - 1);
            left += (span - 2 - middle_complete) as u64 * usual_piece_size;
            left
        }
    }
}

/// A file of a torrent
#[derive(Clone)]
pub struct File {
    shared: Arc<Shared>,
    index: usize,
    path: Vec<String>,
    display_path: String,
    offset: u64,
    length: u64,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("index", &self.index)
            .field("path", &self.display_path)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

impl File {
    pub(crate) fn new(shared: Arc<Shared>, layout: FileLayout) -> Self {
        Self {
            shared,
            index: layout.index,
            path: layout.path,
            display_path: layout.display_path,
            offset: layout.offset,
            length: layout.length,
        }
    }

    /// Index of the file in the torrent
    pub fn index(&self) -> usize {
        self.index
    }

    /// Path components relative to the torrent directory
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Path joined with '/', or the torrent name for a single-file torrent
    pub fn display_path(&self) -> &str {
        &self.display_path
    }

    /// Offset of the file's first byte in the torrent
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn first_piece_index(&self) -> PieceIndex {
        geometry::first_piece_index(self.offset, self.shared.usual_piece_size())
    }

    /// The piece after the last one holding bytes of the file
    pub fn end_piece_index(&self) -> PieceIndex {
        geometry::end_piece_index(self.offset, self.length, self.shared.usual_piece_size())
    }

    /// Pieces that hold nothing but bytes of this file
    pub fn exclusive_pieces(&self) -> PieceRange {
        geometry::byte_region_exclusive_pieces(self.offset, self.length, self.shared.usual_piece_size())
    }

    /// Bytes not downloaded yet
    pub async fn bytes_left(&self) -> u64 {
        let state = self.shared.state.read().await;
        file_bytes_left(
            self.shared.usual_piece_size(),
            self.first_piece_index(),
            self.end_piece_index(),
            self.offset,
            self.length,
            state.completed(),
        )
    }

    /// Bytes downloaded so far
    pub async fn bytes_completed(&self) -> u64 {
        self.length - self.bytes_left().await
    }

    /// Per-piece breakdown of the file, first piece first
    pub async fn state(&self) -> Vec<FilePieceState> {
        if self.length == 0 {
            return Vec::new();
        }
        let piece_size = self.shared.usual_piece_size();
        let first = self.first_piece_index();
        let end = self.end_piece_index();
        let state = self.shared.state.read().await;
        (first..end)
            .map(|index| {
                let bytes = if end - first == 1 {
                    self.length
                } else if index == first {
                    piece_size - self.offset % piece_size
                } else if index == end - 1 {
                    (self.offset + self.length - 1) % piece_size + 1
                } else {
                    piece_size
                };
                FilePieceState {
                    bytes,
                    state: state.piece_state(index),
                }
            })
            .collect()
    }

    /// Minimum priority of the file's pieces
    pub async fn priority(&self) -> PiecePriority {
        self.shared.state.read().await.file_priority(self.index)
    }

    /// Set the minimum priority of the file's pieces
    pub async fn set_priority(&self, priority: PiecePriority) {
        let mut state = self.shared.state.write().await;
        if !state.set_file_priority(self.index, priority) {
            return;
        }
        debug!("File {} priority set to {:?}", self.display_path, priority);
        state.update_piece_priorities(PieceRange::new(self.first_piece_index(), self.end_piece_index()));
    }

    /// Want the whole file
    pub async fn download(&self) {
        self.set_priority(PiecePriority::Normal).await;
    }

    /// Stop wanting the file
    pub async fn cancel(&self) {
        self.set_priority(PiecePriority::None).await;
    }

    /// Reader over the file's bytes with the default readahead
    pub async fn new_reader(&self) -> Reader {
        Reader::new(
            self.shared.clone(),
            self.offset,
            self.length,
            Readahead::Fixed(self.shared.config.default_readahead),
        )
        .await
    }
}
