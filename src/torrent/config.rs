//! Torrent configuration
//!
//! Tunables of a single content store and the readers opened on it.

use crate::error::{Result, StreamError};

/// Default transfer unit within a piece
pub const DEFAULT_CHUNK_SIZE: u32 = 16 * 1024;

/// Default readahead for new readers
pub const DEFAULT_READAHEAD: u64 = 5 * 1024 * 1024;

/// Default number of unchanged re-verifications before a read failure
/// propagates
pub const DEFAULT_MAX_READ_RETRIES: usize = 3;

/// Content store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentConfig {
    /// Size of a chunk, the unit of storage and transfer
    pub chunk_size: u32,
    /// Readahead given to readers created by `new_reader`
    pub default_readahead: u64,
    /// Consecutive storage failures tolerated on one piece whose completion
    /// re-verification changed nothing
    pub max_read_retries: usize,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_readahead: DEFAULT_READAHEAD,
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
        }
    }
}

impl TorrentConfig {
    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the default readahead
    pub fn with_default_readahead(mut self, readahead: u64) -> Self {
        self.default_readahead = readahead;
        self
    }

    /// Set the retry bound for persistent storage failures
    pub fn with_max_read_retries(mut self, retries: usize) -> Self {
        self.max_read_retries = retries;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(StreamError::invalid_argument("chunk size must be positive"));
        }
        if self.max_read_retries == 0 {
            return Err(StreamError::invalid_argument("max read retries must be at least 1"));
        }
        Ok(())
    }
}
