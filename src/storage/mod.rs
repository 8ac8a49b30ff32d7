//! Storage module
//!
//! Piece bookkeeping, the completion bitmap and the byte stores torrent
//! content lives in.

pub mod backend;
pub mod bitmap;
pub mod file;
pub mod memory;
pub mod piece;

// Re-export backend types
pub use backend::{PieceStore, StorageType};

pub use bitmap::Bitmap;

// Re-export piece types
pub use piece::{DownloadState, PieceChunks, PiecePriority, PieceState};

pub use file::{FileEntry, FileStore};
pub use memory::MemoryStore;
