//! Piece geometry
//!
//! Pure conversions between byte offsets, piece indices and chunk requests.
//! Nothing here holds state or fails; a piece size of zero means the metainfo
//! is not known yet and every range degrades to empty.

use std::fmt;
use std::ops::Range;

use serde::Serialize;

/// Index of a piece within a torrent
pub type PieceIndex = usize;

/// Half-open range of piece indices, `[begin, end)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PieceRange {
    pub begin: PieceIndex,
    pub end: PieceIndex,
}

impl PieceRange {
    /// Create a new piece range
    pub fn new(begin: PieceIndex, end: PieceIndex) -> Self {
        Self { begin, end }
    }

    /// Check if the range selects no pieces
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Number of pieces in the range
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    /// Check if a piece lies in the range
    pub fn contains(&self, index: PieceIndex) -> bool {
        self.begin <= index && index < self.end
    }

    /// Iterate over the piece indices of the range
    pub fn iter(&self) -> Range<PieceIndex> {
        self.begin..self.end.max(self.begin)
    }

    /// Smallest range covering both inputs, ignoring empty ones
    pub fn union(&self, other: &PieceRange) -> PieceRange {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => PieceRange::default(),
            (true, false) => *other,
            (false, true) => *self,
            (false, false) => PieceRange::new(self.begin.min(other.begin), self.end.max(other.end)),
        }
    }

    /// Check if the two ranges neither overlap nor touch
    pub fn is_disjoint(&self, other: &PieceRange) -> bool {
        self.end < other.begin || other.end < self.begin
    }
}

impl fmt::Display for PieceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// A chunk of a piece, the unit that is actually stored and transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRequest {
    /// Piece the chunk belongs to
    pub index: PieceIndex,
    /// Byte offset of the chunk within its piece
    pub begin: u32,
    /// Chunk length, shorter than the chunk size only at the end of a piece
    pub length: u32,
}

impl ChunkRequest {
    /// Index of the chunk within its piece
    pub fn chunk_index(&self, chunk_size: u32) -> usize {
        (self.begin / chunk_size) as usize
    }
}

/// Piece containing the byte at `offset`
pub fn piece_index_for_offset(offset: u64, piece_size: u64) -> PieceIndex {
    (offset / piece_size) as PieceIndex
}

/// First piece containing data of a range starting at `range_offset`
pub fn first_piece_index(range_offset: u64, piece_size: u64) -> PieceIndex {
    if piece_size == 0 {
        return 0;
    }
    piece_index_for_offset(range_offset, piece_size)
}

/// The piece after the last one containing data of the range
pub fn end_piece_index(range_offset: u64, range_length: u64, piece_size: u64) -> PieceIndex {
    if piece_size == 0 {
        return 0;
    }
    (range_offset + range_length).div_ceil(piece_size) as PieceIndex
}

/// Pieces that lie entirely within `[offset, offset + size)`.
///
/// Boundary pieces that the region only partially overlaps are left out.
pub fn byte_region_exclusive_pieces(offset: u64, size: u64, piece_size: u64) -> PieceRange {
    if piece_size == 0 {
        return PieceRange::default();
    }
    let begin = offset.div_ceil(piece_size) as PieceIndex;
    let end = ((offset + size) / piece_size) as PieceIndex;
    PieceRange::new(begin, end.max(begin))
}

/// Every piece overlapped by `[offset, offset + size)`, clamped to the torrent
pub fn byte_region_pieces(
    offset: u64,
    size: u64,
    piece_size: u64,
    total_length: u64,
    num_pieces: usize,
) -> PieceRange {
    if piece_size == 0 || size == 0 || offset >= total_length {
        return PieceRange::default();
    }
    let begin = piece_index_for_offset(offset, piece_size);
    let end = end_piece_index(offset, size, piece_size).min(num_pieces);
    PieceRange::new(begin, end.max(begin))
}

/// Length of piece `index`; only the last piece may be short
pub fn piece_len(index: PieceIndex, piece_size: u64, total_length: u64) -> u64 {
    let start = index as u64 * piece_size;
    if start >= total_length {
        return 0;
    }
    piece_size.min(total_length - start)
}

/// Number of chunks a piece of `piece_len` bytes is split into
pub fn chunks_in_piece(piece_len: u64, chunk_size: u32) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    piece_len.div_ceil(chunk_size as u64) as usize
}

/// Chunk request covering the absolute torrent offset
pub fn offset_request(
    offset: u64,
    total_length: u64,
    piece_size: u64,
    chunk_size: u32,
) -> Option<ChunkRequest> {
    if piece_size == 0 || chunk_size == 0 || offset >= total_length {
        return None;
    }
    let index = piece_index_for_offset(offset, piece_size);
    let piece_start = index as u64 * piece_size;
    let piece_length = piece_len(index, piece_size, total_length);
    let chunk = chunk_size as u64;
    let begin = (offset - piece_start) / chunk * chunk;
    let length = chunk.min(piece_length - begin);
    Some(ChunkRequest {
        index,
        begin: begin as u32,
        length: length as u32,
    })
}

/// Absolute torrent offset of the first byte of a chunk request
pub fn request_offset(request: &ChunkRequest, piece_size: u64) -> u64 {
    request.index as u64 * piece_size + request.begin as u64
}
