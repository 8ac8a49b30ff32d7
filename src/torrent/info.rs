//! Torrent metainfo
//!
//! Static description of a torrent: piece hashes, declared files and the
//! byte layout they get when concatenated.

use std::path::{Component, Path};

use anyhow::Result;
use sha1::{Digest, Sha1};

use crate::geometry;

/// A file as declared in the metainfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path below the torrent directory, one component per element
    pub path: Vec<String>,
    pub length: u64,
}

/// Position of a declared file within the torrent's byte space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    /// Index of the file in declaration order
    pub index: usize,
    /// Path components, relative to the torrent directory
    pub path: Vec<String>,
    /// Components joined by '/'; the torrent name for single-file torrents
    pub display_path: String,
    /// Offset of the file's first byte in the torrent
    pub offset: u64,
    pub length: u64,
}

/// Metainfo of one torrent
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// SHA-1 of the encoded info dictionary
    pub info_hash: [u8; 20],
    /// Usual piece size; only the last piece may be shorter
    pub piece_length: u64,
    /// Expected SHA-1 of every piece, in order
    pub pieces: Vec<[u8; 20]>,
    pub name: String,
    /// Content length of a single-file torrent
    pub length: Option<u64>,
    /// Declared files of a multi-file torrent
    pub files: Option<Vec<TorrentFile>>,
}

impl TorrentInfo {
    /// Build metainfo for `content`, hashing it piece by piece.
    ///
    /// With `files` set the content is the concatenation of the files in
    /// order; otherwise it is a single file named `name`. The info hash is
    /// derived from the name and piece hashes since there is no encoded info
    /// dictionary to hash.
    pub fn from_content(
        name: impl Into<String>,
        piece_length: u64,
        files: Option<Vec<TorrentFile>>,
        content: &[u8],
    ) -> Result<Self> {
        if piece_length == 0 {
            return Err(anyhow::anyhow!("piece length must be positive"));
        }
        if let Some(files) = &files {
            let declared: u64 = files.iter().map(|f| f.length).sum();
            if declared != content.len() as u64 {
                return Err(anyhow::anyhow!(
                    "files declare {} bytes but content has {}",
                    declared,
                    content.len()
                ));
            }
        }

        let name = name.into();
        let pieces: Vec<[u8; 20]> = content
            .chunks(piece_length as usize)
            .map(|piece| Sha1::digest(piece).into())
            .collect();

        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        for hash in &pieces {
            hasher.update(hash);
        }
        let info_hash = hasher.finalize().into();

        let length = files.is_none().then_some(content.len() as u64);

        Ok(Self {
            info_hash,
            piece_length,
            pieces,
            name,
            length,
            files,
        })
    }

    /// Sum of the file lengths
    pub fn total_size(&self) -> u64 {
        match (&self.files, self.length) {
            (Some(files), _) => files.iter().map(|f| f.length).sum(),
            (None, Some(length)) => length,
            (None, None) => 0,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Declared files; a single-file torrent yields one file named after
    /// the torrent
    pub fn files_iter(&self) -> Box<dyn Iterator<Item = TorrentFile> + '_> {
        match (&self.files, self.length) {
            (Some(files), _) => Box::new(files.iter().cloned()),
            (None, Some(length)) => Box::new(std::iter::once(TorrentFile {
                path: vec![self.name.clone()],
                length,
            })),
            (None, None) => Box::new(std::iter::empty()),
        }
    }

    /// Offsets of every file, assigned by concatenation in declaration order
    pub fn file_layout(&self) -> Vec<FileLayout> {
        let mut offset = 0u64;
        self.files_iter()
            .enumerate()
            .map(|(index, file)| {
                let display_path = if self.is_multi_file() {
                    file.path.join("/")
                } else {
                    self.name.clone()
                };
                let layout = FileLayout {
                    index,
                    path: file.path,
                    display_path,
                    offset,
                    length: file.length,
                };
                offset += file.length;
                layout
            })
            .collect()
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.is_some()
    }

    /// Info hash in lowercase hex, as shown in logs
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// SHA-1 of an encoded info dictionary
    pub fn generate_info_hash(info_dict_bytes: &[u8]) -> [u8; 20] {
        Sha1::digest(info_dict_bytes).into()
    }

    /// Split the `pieces` field into 20-byte hashes
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(anyhow::anyhow!(
                "pieces field is {} bytes, not a whole number of SHA-1 hashes",
                pieces_bytes.len()
            ));
        }
        pieces_bytes
            .chunks_exact(20)
            .map(|chunk| <[u8; 20]>::try_from(chunk).map_err(anyhow::Error::from))
            .collect()
    }

    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Byte range `[start, end)` of a piece in the torrent
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        self.pieces.get(index)?;
        let start = index as u64 * self.piece_length;
        let len = geometry::piece_len(index, self.piece_length, self.total_size());
        Some((start, start + len))
    }

    /// Check that the piece count agrees with the total size and that every
    /// path component names an entry inside the torrent directory
    pub fn validate(&self) -> Result<()> {
        if !is_plain_component(&self.name) {
            return Err(anyhow::anyhow!("unsafe torrent name '{}'", self.name));
        }
        if let Some(files) = &self.files {
            for file in files {
                if file.path.is_empty() || !file.path.iter().all(|c| is_plain_component(c)) {
                    return Err(anyhow::anyhow!("unsafe file path {:?}", file.path));
                }
            }
        }
        if self.piece_length == 0 {
            return Err(anyhow::anyhow!("piece length must be positive"));
        }
        let expected = self.total_size().div_ceil(self.piece_length) as usize;
        if expected != self.pieces.len() {
            return Err(anyhow::anyhow!(
                "{} bytes in pieces of {} need {} hashes, got {}",
                self.total_size(),
                self.piece_length,
                expected,
                self.pieces.len()
            ));
        }
        Ok(())
    }
}

/// A single normal path component: not empty, no separators and not `.`,
/// `..` or a root
fn is_plain_component(component: &str) -> bool {
    let mut components = Path::new(component).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == component
    )
}
