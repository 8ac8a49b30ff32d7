//! torrent-stream
//!
//! Piece-addressable access to torrent content: file-to-piece mapping,
//! completion accounting per file, and seekable readers that block until the
//! pieces under them arrive.

pub mod cli;
pub mod error;
pub mod file;
pub mod geometry;
pub mod reader;
pub mod storage;
pub mod torrent;

pub use error::{Result, StreamError};

pub use file::{file_bytes_left, File, FilePieceState};
pub use geometry::{ChunkRequest, PieceIndex, PieceRange};
pub use reader::{adaptive_readahead, Readahead, ReadaheadContext, Reader, ReaderCloser};
pub use storage::{
    Bitmap, DownloadState, FileStore, MemoryStore, PiecePriority, PieceState, PieceStore, StorageType,
};
pub use torrent::{DemandChange, ReaderId, Torrent, TorrentConfig, TorrentInfo, TorrentParser};
pub use cli::{CliArgs, Config};
