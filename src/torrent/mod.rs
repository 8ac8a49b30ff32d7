//! Torrent content store
//!
//! A `Torrent` owns the completion bitmap, piece priorities and reader set of
//! one torrent, moves bytes through its `PieceStore`, and hands out file
//! views and readers over the content.

pub mod config;
pub mod info;
pub mod parser;
pub mod signals;
pub mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};
use crate::file::File;
use crate::geometry::{self, PieceIndex, PieceRange};
use crate::reader::{Readahead, Reader};
use crate::storage::{Bitmap, PieceState, PieceStore};

pub use config::TorrentConfig;
pub use info::{FileLayout, TorrentFile, TorrentInfo};
pub use parser::TorrentParser;
pub use signals::Signals;
pub use state::{DemandChange, ReaderId, TorrentState};

/// State shared by a torrent, its file views and its readers
pub(crate) struct Shared {
    pub(crate) info: TorrentInfo,
    pub(crate) config: TorrentConfig,
    pub(crate) storage: Arc<dyn PieceStore>,
    pub(crate) state: RwLock<TorrentState>,
    pub(crate) signals: Signals,
    /// Held while a piece is checked against storage and the result committed
    verifying: Vec<Mutex<()>>,
    next_reader_id: AtomicU64,
}

impl Shared {
    pub(crate) fn usual_piece_size(&self) -> u64 {
        self.info.piece_length
    }

    pub(crate) fn total_length(&self) -> u64 {
        self.info.total_size()
    }

    pub(crate) fn num_pieces(&self) -> usize {
        self.info.piece_count()
    }

    pub(crate) fn next_reader_id(&self) -> ReaderId {
        ReaderId(self.next_reader_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Ask the storage whether a piece is complete and record the answer.
    ///
    /// Readiness of the piece is broadcast either way so waiters re-check.
    pub(crate) async fn update_piece_completion(&self, index: PieceIndex) -> Result<bool> {
        if index >= self.num_pieces() {
            return Err(StreamError::invalid_argument(format!(
                "piece index {} out of range",
                index
            )));
        }

        let _verifying = self.verifying[index].lock().await;
        let complete = match self.storage.piece_completion(index).await {
            Ok(complete) => complete,
            Err(e) => {
                self.state.write().await.set_checking(index, false);
                self.signals.piece_ready(index);
                return Err(e.into());
            }
        };

        let (changed, was_complete) = {
            let mut state = self.state.write().await;
            let was_complete = state.piece_complete(index);
            (state.set_completion(index, complete), was_complete)
        };
        if changed && was_complete {
            warn!("Piece {} failed re-verification and is incomplete again", index);
        } else if changed {
            debug!("Piece {} verified", index);
        }
        self.signals.piece_ready(index);
        Ok(changed)
    }
}

/// A torrent whose content is read through file views and readers
#[derive(Clone)]
pub struct Torrent {
    shared: Arc<Shared>,
    files: Vec<File>,
}

impl fmt::Debug for Torrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Torrent")
            .field("name", &self.shared.info.name)
            .field("info_hash", &self.shared.info.info_hash_hex())
            .field("storage", &self.shared.storage.storage_type())
            .field("files", &self.files.len())
            .finish()
    }
}

impl Torrent {
    /// Create a torrent over `storage`, which must hold exactly the torrent's
    /// bytes. No piece is considered complete until verified.
    pub fn new(info: TorrentInfo, storage: Arc<dyn PieceStore>, config: TorrentConfig) -> Result<Self> {
        config.validate()?;
        info.validate()
            .map_err(|e| StreamError::metainfo(e.to_string()))?;
        if storage.len() != info.total_size() {
            return Err(StreamError::metainfo(format!(
                "storage holds {} bytes, torrent has {}",
                storage.len(),
                info.total_size()
            )));
        }

        let piece_length = info.piece_length;
        let layout = info.file_layout();
        let extents = layout
            .iter()
            .map(|f| {
                PieceRange::new(
                    geometry::first_piece_index(f.offset, piece_length),
                    geometry::end_piece_index(f.offset, f.length, piece_length),
                )
            })
            .collect();

        let state = TorrentState::new(
            piece_length,
            info.total_size(),
            info.piece_count(),
            config.chunk_size,
            extents,
        );

        info!(
            "Opened torrent {} ({} bytes, {} pieces, {} files, {} storage)",
            info.name,
            info.total_size(),
            info.piece_count(),
            layout.len(),
            storage.storage_type()
        );

        let shared = Arc::new(Shared {
            signals: Signals::new(info.piece_count()),
            verifying: (0..info.piece_count()).map(|_| Mutex::new(())).collect(),
            state: RwLock::new(state),
            info,
            config,
            storage,
            next_reader_id: AtomicU64::new(0),
        });
        let files = layout
            .into_iter()
            .map(|f| File::new(shared.clone(), f))
            .collect();

        Ok(Self { shared, files })
    }

    /// Static metainfo
    pub fn info(&self) -> &TorrentInfo {
        &self.shared.info
    }

    pub fn config(&self) -> &TorrentConfig {
        &self.shared.config
    }

    /// File views in declaration order
    pub fn files(&self) -> &[File] {
        &self.files
    }

    /// File view by index
    pub fn file(&self, index: usize) -> Option<&File> {
        self.files.get(index)
    }

    pub fn piece_length(&self) -> u64 {
        self.shared.info.piece_length
    }

    /// Size of every piece but the last, 0 if unknown
    pub fn usual_piece_size(&self) -> u64 {
        self.shared.usual_piece_size()
    }

    pub fn num_pieces(&self) -> usize {
        self.shared.num_pieces()
    }

    pub fn total_length(&self) -> u64 {
        self.shared.total_length()
    }

    /// Lock the torrent state for reading
    pub async fn state(&self) -> RwLockReadGuard<'_, TorrentState> {
        self.shared.state.read().await
    }

    pub async fn piece_state(&self, index: PieceIndex) -> PieceState {
        self.shared.state.read().await.piece_state(index)
    }

    pub async fn piece_complete(&self, index: PieceIndex) -> bool {
        self.shared.state.read().await.piece_complete(index)
    }

    /// Detached copy of the completion bitmap
    pub async fn completed_pieces(&self) -> Bitmap {
        self.shared.state.read().await.completed().clone()
    }

    pub async fn bytes_completed(&self) -> u64 {
        self.shared.state.read().await.bytes_completed()
    }

    /// Store one chunk of a piece.
    ///
    /// `begin` must be chunk aligned and `data` exactly as long as the chunk.
    /// Once every chunk of the piece is stored the piece is verified.
    pub async fn write_chunk(&self, index: PieceIndex, begin: u32, data: &[u8]) -> Result<()> {
        let request = {
            let state = self.shared.state.read().await;
            let request = state
                .offset_request(geometry::request_offset(
                    &geometry::ChunkRequest { index, begin, length: 0 },
                    self.piece_length(),
                ))
                .filter(|r| r.index == index && r.begin == begin)
                .ok_or_else(|| {
                    StreamError::invalid_argument(format!(
                        "no chunk at offset {} of piece {}",
                        begin, index
                    ))
                })?;
            if request.length as usize != data.len() {
                return Err(StreamError::invalid_argument(format!(
                    "chunk {} of piece {} is {} bytes, got {}",
                    begin,
                    index,
                    request.length,
                    data.len()
                )));
            }
            if state.piece_complete(index) {
                debug!("Ignoring chunk {} of complete piece {}", begin, index);
                return Ok(());
            }
            request
        };

        let offset = geometry::request_offset(&request, self.piece_length());
        self.shared.storage.write_at(data, offset).await?;

        let all_stored = {
            let mut state = self.shared.state.write().await;
            let all_stored = state.mark_chunk(&request);
            if all_stored {
                state.set_checking(index, true);
            }
            all_stored
        };
        self.shared.signals.piece_ready(index);

        if all_stored {
            self.shared.update_piece_completion(index).await?;
        }
        Ok(())
    }

    /// Store a whole piece, chunk by chunk
    pub async fn write_piece(&self, index: PieceIndex, data: &[u8]) -> Result<()> {
        let expected = geometry::piece_len(index, self.piece_length(), self.total_length());
        if index >= self.num_pieces() || data.len() as u64 != expected {
            return Err(StreamError::invalid_argument(format!(
                "piece {} is {} bytes, got {}",
                index,
                expected,
                data.len()
            )));
        }
        let chunk_size = self.shared.config.chunk_size as usize;
        for (i, chunk) in data.chunks(chunk_size).enumerate() {
            self.write_chunk(index, (i * chunk_size) as u32, chunk).await?;
        }
        Ok(())
    }

    /// Re-verify one piece, returning whether its completion changed
    pub async fn update_piece_completion(&self, index: PieceIndex) -> Result<bool> {
        self.shared.update_piece_completion(index).await
    }

    /// Verify every piece against the storage, returning the number complete
    pub async fn verify_data(&self) -> Result<usize> {
        info!("Verifying {} pieces of {}", self.num_pieces(), self.shared.info.name);
        for index in 0..self.num_pieces() {
            self.shared.update_piece_completion(index).await?;
        }
        let complete = self.shared.state.read().await.completed().count();
        info!("{}/{} pieces complete", complete, self.num_pieces());
        Ok(complete)
    }

    /// Recompute effective priorities of a piece range
    pub async fn update_piece_priorities(&self, range: PieceRange) {
        self.shared.state.write().await.update_piece_priorities(range);
    }

    /// Receive every reader demand change from now on
    pub async fn subscribe_demand(&self) -> mpsc::UnboundedReceiver<DemandChange> {
        self.shared.state.write().await.subscribe_demand()
    }

    /// Reader over the whole torrent with the default readahead
    pub async fn new_reader(&self) -> Reader {
        Reader::new(
            self.shared.clone(),
            0,
            self.total_length(),
            Readahead::Fixed(self.shared.config.default_readahead),
        )
        .await
    }

    /// Close the torrent. Blocked reads fail with `TorrentClosed`.
    pub fn close(&self) {
        if !self.shared.signals.is_closed() {
            info!("Closing torrent {}", self.shared.info.name);
            self.shared.signals.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.signals.is_closed()
    }

    pub fn allow_data_download(&self) {
        self.shared.signals.set_data_download_allowed(true);
    }

    /// Stop downloading data. Reads blocked on missing pieces fail with
    /// `DownloadingDisabled`.
    pub fn disallow_data_download(&self) {
        self.shared.signals.set_data_download_allowed(false);
    }

    pub fn data_download_allowed(&self) -> bool {
        self.shared.signals.data_download_allowed()
    }

    pub fn enable_networking(&self) {
        self.shared.signals.set_networking_enabled(true);
    }

    /// Disable networking. Reads blocked on missing pieces fail with
    /// `NetworkingDisabled`.
    pub fn disable_networking(&self) {
        self.shared.signals.set_networking_enabled(false);
    }

    pub fn networking_enabled(&self) -> bool {
        self.shared.signals.networking_enabled()
    }
}
