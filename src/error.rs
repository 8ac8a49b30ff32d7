//! Error types for torrent streams
//!
//! This module defines the error taxonomy shared by file views, readers and
//! the content store.

use std::io;

use thiserror::Error;

use crate::geometry::PieceIndex;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors produced while reading torrent content
#[derive(Debug, Error)]
pub enum StreamError {
    /// A malformed argument, such as a bad seek whence or a negative position
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The reader position reached the end of its byte range
    #[error("end of stream")]
    EndOfStream,

    /// The storage ended a transfer before the logical range did
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEndOfStream { offset: u64 },

    /// The caller cancelled a blocking read
    #[error("read cancelled")]
    Cancelled,

    /// The torrent was closed
    #[error("torrent closed")]
    TorrentClosed,

    /// The reader was closed
    #[error("reader closed")]
    ReaderClosed,

    /// Data downloading is disallowed, so missing pieces will not arrive
    #[error("torrent data downloading disabled")]
    DownloadingDisabled,

    /// Networking is disabled, so missing pieces will not arrive
    #[error("torrent networking disabled")]
    NetworkingDisabled,

    /// Reading a piece kept failing after its completion was re-verified
    #[error("storage read failed for piece {piece}: {source}")]
    StorageReadFailure {
        piece: PieceIndex,
        #[source]
        source: io::Error,
    },

    /// Storage I/O failure outside of the read path
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// Torrent layout that cannot be served
    #[error("metainfo error: {0}")]
    Metainfo(String),
}

impl StreamError {
    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StreamError::InvalidArgument(message.into())
    }

    /// Create a new Metainfo error
    pub fn metainfo(message: impl Into<String>) -> Self {
        StreamError::Metainfo(message.into())
    }

    /// Create a new StorageReadFailure error
    pub fn storage_read_failure(piece: PieceIndex, source: io::Error) -> Self {
        StreamError::StorageReadFailure { piece, source }
    }

    /// True for either torrent or reader closure
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamError::TorrentClosed | StreamError::ReaderClosed)
    }

    /// True when the caller cancelled the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }

    /// True when the error came from a policy signal rather than a failure
    pub fn is_disabled(&self) -> bool {
        matches!(
            self,
            StreamError::DownloadingDisabled | StreamError::NetworkingDisabled
        )
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            StreamError::EndOfStream | StreamError::UnexpectedEndOfStream { .. } => {
                io::ErrorKind::UnexpectedEof
            }
            StreamError::Cancelled => io::ErrorKind::Interrupted,
            StreamError::TorrentClosed | StreamError::ReaderClosed => io::ErrorKind::BrokenPipe,
            StreamError::DownloadingDisabled | StreamError::NetworkingDisabled => {
                io::ErrorKind::WouldBlock
            }
            StreamError::StorageReadFailure { source, .. } => source.kind(),
            StreamError::Storage(source) => source.kind(),
            StreamError::Metainfo(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument() {
        let err = StreamError::invalid_argument("bad whence 7");
        assert_eq!(err.to_string(), "invalid argument: bad whence 7");
    }

    #[test]
    fn test_storage_read_failure_display() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let err = StreamError::storage_read_failure(3, io_err);
        assert!(err.to_string().contains("piece 3"));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_closed_predicates() {
        assert!(StreamError::TorrentClosed.is_closed());
        assert!(StreamError::ReaderClosed.is_closed());
        assert!(!StreamError::Cancelled.is_closed());
        assert!(StreamError::Cancelled.is_cancelled());
        assert!(StreamError::NetworkingDisabled.is_disabled());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: StreamError = io_err.into();
        assert!(matches!(err, StreamError::Storage(_)));
    }

    #[test]
    fn test_into_io_error_kind() {
        let err: io::Error = StreamError::Cancelled.into();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);

        let err: io::Error = StreamError::invalid_argument("x").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = StreamError::UnexpectedEndOfStream { offset: 9 }.into();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
