//! Storage backend abstraction for torrent content
//!
//! The content store never touches bytes itself. It moves them in and out of
//! a `PieceStore`, and asks the store whether a piece's stored bytes are
//! complete and valid. How that is decided (hash check, trusted resume data,
//! a remote service) is up to the implementation.

use std::io;

use async_trait::async_trait;

use crate::geometry::PieceIndex;

/// Byte storage for the whole torrent, addressed by absolute offset
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// Total number of bytes the store holds
    fn len(&self) -> u64;

    /// Check if the store holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read bytes at `offset` into `buf`.
    ///
    /// Returns the number of bytes transferred. An error means the bytes that
    /// should be there could not be produced, and the caller will re-verify the
    /// affected pieces.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `data` at `offset`
    async fn write_at(&self, data: &[u8], offset: u64) -> io::Result<()>;

    /// Report whether the stored bytes of a piece are complete and valid
    async fn piece_completion(&self, index: PieceIndex) -> io::Result<bool>;

    /// Storage type identifier, used in logs
    fn storage_type(&self) -> StorageType;
}

/// Storage type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Bytes held in memory
    Memory,
    /// Local filesystem storage
    File,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Memory => write!(f, "memory"),
            StorageType::File => write!(f, "file"),
        }
    }
}
