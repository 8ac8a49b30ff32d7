//! File storage module
//!
//! Maps the torrent byte space onto the files of the torrent under a base
//! directory. A read or write that crosses a file boundary is split across
//! the files it touches.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

use crate::geometry::{piece_len, PieceIndex};
use crate::storage::backend::{PieceStore, StorageType};
use crate::torrent::TorrentInfo;

/// Reject paths that are empty or could leave the directory they are joined
/// onto
fn validate_file_path(path: &Path) -> io::Result<()> {
    let safe = path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        error!("Refusing unsafe file path '{}'", path.display());
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsafe file path in metainfo: '{}'", path.display()),
        ));
    }
    Ok(())
}

/// Represents a file entry in the storage
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

impl FileEntry {
    fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Torrent content stored as regular files
#[derive(Debug)]
pub struct FileStore {
    /// Base download directory
    base_path: PathBuf,
    /// Files in torrent order with their absolute offsets
    entries: Vec<FileEntry>,
    len: u64,
    piece_length: u64,
    hashes: Vec<[u8; 20]>,
}

impl FileStore {
    /// Create a new file store rooted at `base_path`.
    ///
    /// Fails if a file path of the metainfo would resolve outside of
    /// `base_path`.
    pub fn new(base_path: PathBuf, info: &TorrentInfo) -> io::Result<Self> {
        info!("Creating file storage for torrent: {}", info.name);
        info!("Base path: {}", base_path.display());

        let mut entries = Vec::new();
        for layout in info.file_layout() {
            let mut relative = PathBuf::new();
            if info.is_multi_file() {
                relative.push(&info.name);
            }
            relative.extend(&layout.path);
            validate_file_path(&relative)?;
            entries.push(FileEntry {
                path: base_path.join(relative),
                offset: layout.offset,
                length: layout.length,
            });
        }
        debug!("Mapped {} files", entries.len());

        Ok(Self {
            base_path,
            entries,
            len: info.total_size(),
            piece_length: info.piece_length,
            hashes: info.pieces.clone(),
        })
    }

    /// Create every file of the torrent at its full length
    pub async fn create_files(&self) -> io::Result<()> {
        info!("Creating {} files under {}", self.entries.len(), self.base_path.display());
        for entry in &self.entries {
            if let Some(parent) = entry.path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    error!("Failed to create directory '{}': {}", parent.display(), e);
                    e
                })?;
            }
            let f = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&entry.path)
                .await
                .map_err(|e| {
                    error!("Failed to create file '{}': {}", entry.path.display(), e);
                    e
                })?;
            f.set_len(entry.length).await?;
            debug!("Created file: {} ({} bytes)", entry.path.display(), entry.length);
        }
        Ok(())
    }

    /// Entries overlapping `[offset, offset + length)` paired with the
    /// overlap as (offset within file, bytes, offset within the request)
    fn spans(&self, offset: u64, length: u64) -> Vec<(&FileEntry, u64, usize, usize)> {
        let end = offset + length;
        self.entries
            .iter()
            .filter(|e| e.length > 0 && e.end() > offset && e.offset < end)
            .map(|e| {
                let start = offset.max(e.offset);
                let stop = end.min(e.end());
                (
                    e,
                    start - e.offset,
                    (stop - start) as usize,
                    (start - offset) as usize,
                )
            })
            .collect()
    }

    async fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        for (entry, file_offset, n, buf_offset) in self.spans(offset, buf.len() as u64) {
            trace!("Reading {} bytes from file {} at offset {}", n, entry.path.display(), file_offset);
            let mut handle = fs::File::open(&entry.path).await?;
            handle.seek(io::SeekFrom::Start(file_offset)).await?;
            handle.read_exact(&mut buf[buf_offset..buf_offset + n]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PieceStore for FileStore {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(self.len - offset) as usize;
        self.read_exact_at(&mut buf[..n], offset).await.map_err(|e| {
            warn!("Failed to read {} bytes at offset {}: {}", n, offset, e);
            e
        })?;
        Ok(n)
    }

    async fn write_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        let end = offset + data.len() as u64;
        if end > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of [{}, {}) exceeds torrent length {}", offset, end, self.len),
            ));
        }
        for (entry, file_offset, n, data_offset) in self.spans(offset, data.len() as u64) {
            trace!("Writing {} bytes to file {} at offset {}", n, entry.path.display(), file_offset);
            let mut handle = fs::OpenOptions::new()
                .write(true)
                .open(&entry.path)
                .await
                .map_err(|e| {
                    error!("Failed to open file '{}': {}", entry.path.display(), e);
                    e
                })?;
            handle.seek(io::SeekFrom::Start(file_offset)).await?;
            handle.write_all(&data[data_offset..data_offset + n]).await?;
            handle.flush().await?;
        }
        debug!("Wrote {} bytes at offset {}", data.len(), offset);
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
        let mut data = vec![0u8; piece_len(index, self.piece_length, self.len) as usize];
        match self.read_exact_at(&mut data, start).await {
            Ok(()) => {}
            // missing or short files simply hold no complete data yet
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::UnexpectedEof) => {
                trace!("Piece {} not on disk: {}", index, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let valid = Sha1::digest(&data).as_slice() == expected;
        if valid {
            trace!("Piece {} verification: PASSED", index);
        } else {
            debug!("Piece {} verification: FAILED (hash mismatch)", index);
        }
        Ok(valid)
    }

    fn storage_type(&self) -> StorageType {
        StorageType::File
    }
}
