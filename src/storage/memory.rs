//! In-memory piece store
//!
//! Holds the whole torrent in one buffer. Completion is a SHA-1 comparison
//! against the metainfo piece hashes.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::geometry::{piece_len, PieceIndex};
use crate::storage::backend::{PieceStore, StorageType};
use crate::torrent::TorrentInfo;

/// Torrent content kept in memory
#[derive(Debug)]
pub struct MemoryStore {
    data: RwLock<BytesMut>,
    len: u64,
    piece_length: u64,
    hashes: Vec<[u8; 20]>,
}

impl MemoryStore {
    /// Create an empty (zero-filled) store sized for the torrent
    pub fn new(info: &TorrentInfo) -> Self {
        let len = info.total_size();
        debug!("Creating memory store for {} ({} bytes)", info.name, len);
        Self {
            data: RwLock::new(BytesMut::zeroed(len as usize)),
            len,
            piece_length: info.piece_length,
            hashes: info.pieces.clone(),
        }
    }

    /// Create a store already holding `content`
    pub fn with_content(info: &TorrentInfo, content: &[u8]) -> io::Result<Self> {
        if content.len() as u64 != info.total_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "content is {} bytes, torrent is {}",
                    content.len(),
                    info.total_size()
                ),
            ));
        }
        Ok(Self {
            data: RwLock::new(BytesMut::from(content)),
            len: info.total_size(),
            piece_length: info.piece_length,
            hashes: info.pieces.clone(),
        })
    }

    /// Overwrite stored bytes without going through the torrent.
    ///
    /// Used to simulate on-disk corruption of a piece that already passed
    /// verification.
    pub async fn corrupt(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        warn!("Corrupting {} bytes at offset {}", data.len(), offset);
        self.write_at(data, offset).await
    }
}

#[async_trait]
impl PieceStore for MemoryStore {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let data = self.data.read().await;
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        trace!("Read {} bytes at offset {} from memory", n, offset);
        Ok(n)
    }

    async fn write_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        let end = offset + data.len() as u64;
        if end > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of [{}, {}) exceeds store length {}", offset, end, self.len),
            ));
        }
        let mut buffer = self.data.write().await;
        buffer[offset as usize..end as usize].copy_from_slice(data);
        trace!("Wrote {} bytes at offset {} to memory", data.len(), offset);
        Ok(())
    }

    async fn piece_completion(&self, index: PieceIndex) -> io::Result<bool> {
        let expected = self.hashes.get(index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("piece index {} out of range", index),
            )
        })?;
        let start = index as u64 * self.piece_length;
        let length = piece_len(index, self.piece_length, self.len);
        let data = self.data.read().await;
        let hash = Sha1::digest(&data[start as usize..(start + length) as usize]);
        let valid = hash.as_slice() == expected;
        if !valid {
            trace!("Piece {} hash mismatch", index);
        }
        Ok(valid)
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}
