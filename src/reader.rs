//! Reader cursor
//!
//! A `Reader` is a seekable cursor over a byte range of a torrent, either the
//! whole torrent or one file. Reads block until the bytes under the cursor
//! are available, and the cursor keeps the torrent informed of the piece
//! range it wants next (its demand) so that range can be fetched first.
//!
//! Demand is derived from the position, the readahead policy and whether
//! the reader is actively reading. Every mutation of those recomputes it and
//! reports only the change.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, StreamError};
use crate::geometry::{self, PieceIndex, PieceRange};
use crate::torrent::signals::{wait_changed, wait_disabled};
use crate::torrent::state::{ReaderId, TorrentState};
use crate::torrent::Shared;

/// Inputs to a dynamic readahead policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadaheadContext {
    /// Position where the current run of sequential reads began
    pub contiguous_read_start_pos: u64,
    /// Current position of the reader
    pub current_pos: u64,
}

/// Dynamic readahead policy, evaluated on every demand recomputation
pub type ReadaheadFunc = Arc<dyn Fn(ReadaheadContext) -> u64 + Send + Sync>;

/// How far past its position a reader asks for data
#[derive(Clone)]
pub enum Readahead {
    /// A fixed number of bytes
    Fixed(u64),
    /// Computed from the reader's progress
    Func(ReadaheadFunc),
}

impl fmt::Debug for Readahead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readahead::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Readahead::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// Readahead that grows with the length of the current sequential run
pub fn adaptive_readahead(ctx: ReadaheadContext) -> u64 {
    ctx.current_pos.saturating_sub(ctx.contiguous_read_start_pos)
}

/// Cursor over a byte range of a torrent.
///
/// Positions are relative to the start of the range. Mutating operations
/// take `&mut self`; use a [`ReaderCloser`] to close a reader from another
/// task while it is blocked in a read.
pub struct Reader {
    id: ReaderId,
    shared: Arc<Shared>,
    offset: u64,
    length: u64,
    pos: u64,
    reading: bool,
    readahead: Readahead,
    contiguous_read_start: u64,
    pieces: PieceRange,
    responsive: bool,
    closed: CancellationToken,
    deregistered: bool,
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("pos", &self.pos)
            .field("reading", &self.reading)
            .field("readahead", &self.readahead)
            .field("pieces", &self.pieces)
            .field("responsive", &self.responsive)
            .finish()
    }
}

impl Reader {
    /// Create a reader over `[offset, offset + length)` and register it
    pub(crate) async fn new(shared: Arc<Shared>, offset: u64, length: u64, readahead: Readahead) -> Self {
        let id = shared.next_reader_id();
        let closed = shared.signals.closed_token().child_token();
        shared.state.write().await.add_reader(id);
        debug!("New {} over [{}, {})", id, offset, offset + length);
        Self {
            id,
            shared,
            offset,
            length,
            pos: 0,
            reading: false,
            readahead,
            contiguous_read_start: 0,
            pieces: PieceRange::default(),
            responsive: false,
            closed,
            deregistered: false,
        }
    }

    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Current position, relative to the start of the range
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Length of the range
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_reading(&self) -> bool {
        self.reading
    }

    pub fn is_responsive(&self) -> bool {
        self.responsive
    }

    /// Check if the reader or its torrent was closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Demand last reported to the torrent
    pub fn pieces(&self) -> PieceRange {
        self.pieces
    }

    /// Handle that closes this reader from another task
    pub fn closer(&self) -> ReaderCloser {
        ReaderCloser {
            id: self.id,
            shared: self.shared.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Demand implied by the current position, readahead and reading flag
    pub fn pieces_uncached(&self) -> PieceRange {
        let mut ra = match &self.readahead {
            Readahead::Fixed(n) => *n,
            Readahead::Func(f) => f(ReadaheadContext {
                contiguous_read_start_pos: self.contiguous_read_start,
                current_pos: self.pos,
            }),
        };
        // [x, x) wants nothing
        ra = ra.max(1);
        if !self.reading {
            ra = 0;
        }
        ra = ra.min(self.length - self.pos);
        geometry::byte_region_pieces(
            self.offset + self.pos,
            ra,
            self.shared.usual_piece_size(),
            self.shared.total_length(),
            self.shared.num_pieces(),
        )
    }

    async fn pos_changed(&mut self) {
        let to = self.pieces_uncached();
        if to == self.pieces {
            return;
        }
        let from = std::mem::replace(&mut self.pieces, to);
        if self.deregistered {
            return;
        }
        self.shared
            .state
            .write()
            .await
            .reader_pos_changed(self.id, from, to);
    }

    /// Use a fixed readahead of `readahead` bytes
    pub async fn set_readahead(&mut self, readahead: u64) {
        self.readahead = Readahead::Fixed(readahead);
        self.pos_changed().await;
    }

    /// Compute readahead with `f` on every demand recomputation
    pub async fn set_readahead_func<F>(&mut self, f: F)
    where
        F: Fn(ReadaheadContext) -> u64 + Send + Sync + 'static,
    {
        self.readahead = Readahead::Func(Arc::new(f));
        self.pos_changed().await;
    }

    /// Grow readahead with the length of the current sequential run
    pub async fn set_adaptive_readahead(&mut self) {
        self.set_readahead_func(adaptive_readahead).await;
    }

    /// Accept bytes of pieces that are stored but not verified yet
    pub fn set_responsive(&mut self) {
        self.responsive = true;
        self.shared.signals.broadcast_event();
    }

    /// Only accept bytes of verified pieces
    pub fn set_non_responsive(&mut self) {
        self.responsive = false;
        self.shared.signals.broadcast_event();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.signals.is_closed() {
            return Err(StreamError::TorrentClosed);
        }
        if self.closed.is_cancelled() {
            return Err(StreamError::ReaderClosed);
        }
        Ok(())
    }

    /// Move the cursor. Seeking to the current position changes nothing.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let (base, delta) = match pos {
            SeekFrom::Start(n) => (0i128, n as i128),
            SeekFrom::Current(n) => (self.pos as i128, n as i128),
            SeekFrom::End(n) => (self.length as i128, n as i128),
        };
        let new = base + delta;
        if new < 0 {
            return Err(StreamError::invalid_argument(format!(
                "seek to negative position {}",
                new
            )));
        }
        if new > self.length as i128 {
            return Err(StreamError::invalid_argument(format!(
                "seek to {} past end of {} byte range",
                new, self.length
            )));
        }

        let new = new as u64;
        if new == self.pos {
            return Ok(new);
        }
        trace!("{} seek {} -> {}", self.id, self.pos, new);
        self.reading = false;
        self.pos = new;
        self.contiguous_read_start = new;
        self.pos_changed().await;
        Ok(new)
    }

    /// Seek with a numeric whence: 0 from the start, 1 from the current
    /// position, 2 from the end
    pub async fn seek_whence(&mut self, offset: i64, whence: i32) -> Result<u64> {
        let pos = match whence {
            0 if offset < 0 => {
                return Err(StreamError::invalid_argument(format!(
                    "seek to negative position {}",
                    offset
                )))
            }
            0 => SeekFrom::Start(offset as u64),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => return Err(StreamError::invalid_argument(format!("invalid whence {}", whence))),
        };
        self.seek(pos).await
    }

    /// Read into `buf`, blocking until some bytes are available.
    ///
    /// Returns `Ok(0)` at the end of the range.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read_with_cancel(&CancellationToken::new(), buf).await
    }

    /// Read into `buf`, giving up with `Cancelled` once `cancel` fires.
    ///
    /// At most one storage transfer is made per call.
    pub async fn read_with_cancel(&mut self, cancel: &CancellationToken, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if !buf.is_empty() {
            self.reading = true;
            self.pos_changed().await;
        }

        match self.read_once_at(cancel, buf, self.pos).await {
            Ok(n) => {
                self.pos += n as u64;
                self.pos_changed().await;
                Ok(n)
            }
            Err(StreamError::EndOfStream) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Read until the end of the range, appending to `out`
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        let mut buf = vec![0u8; self.shared.config.chunk_size as usize];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn torrent_piece(&self, pos: u64) -> PieceIndex {
        geometry::piece_index_for_offset(self.offset + pos, self.shared.usual_piece_size())
    }

    async fn read_once_at(&self, cancel: &CancellationToken, buf: &mut [u8], pos: u64) -> Result<usize> {
        if pos >= self.length {
            return Err(StreamError::EndOfStream);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let max_retries = self.shared.config.max_read_retries;
        let mut unchanged_failures = 0;
        loop {
            let (available, waits) = {
                let state = self.shared.state.read().await;
                let available = self.available_locked(&state, pos, buf.len() as u64);
                // subscribe before the guard drops so no broadcast is missed
                let waits = (available == 0).then(|| Waits::subscribe(self, pos));
                (available, waits)
            };

            if let Some(waits) = waits {
                self.wait_available(cancel, waits).await?;
                continue;
            }

            let n = available.min(buf.len() as u64) as usize;
            let torrent_offset = self.offset + pos;
            match self.shared.storage.read_at(&mut buf[..n], torrent_offset).await {
                Ok(0) => return Err(StreamError::UnexpectedEndOfStream { offset: torrent_offset }),
                Ok(read) => return Ok(read),
                Err(e) => {
                    let piece = self.torrent_piece(pos);
                    warn!(
                        "{} error reading torrent offset {} ({} bytes): {}",
                        self.id, torrent_offset, n, e
                    );
                    let changed = self.shared.update_piece_completion(piece).await?;
                    for other in self.pieces.iter().filter(|&i| i != piece) {
                        if let Err(err) = self.shared.update_piece_completion(other).await {
                            warn!("Failed to re-verify piece {}: {}", other, err);
                        }
                    }
                    if changed {
                        unchanged_failures = 0;
                    } else {
                        unchanged_failures += 1;
                        if unchanged_failures >= max_retries {
                            return Err(StreamError::storage_read_failure(piece, e));
                        }
                    }
                }
            }
        }
    }

    async fn wait_available(&self, cancel: &CancellationToken, waits: Waits) -> Result<()> {
        trace!("{} waiting on piece {}", self.id, waits.piece);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            _ = self.closed.cancelled() => {
                if self.shared.signals.is_closed() {
                    Err(StreamError::TorrentClosed)
                } else {
                    Err(StreamError::ReaderClosed)
                }
            }
            _ = wait_disabled(waits.download) => Err(StreamError::DownloadingDisabled),
            _ = wait_disabled(waits.networking) => Err(StreamError::NetworkingDisabled),
            _ = wait_changed(waits.ready) => Ok(()),
            _ = wait_changed(Some(waits.event)) => Ok(()),
        }
    }

    /// Bytes readable at `offset` of the range without blocking, up to `max`
    pub async fn available(&self, offset: u64, max: u64) -> u64 {
        let state = self.shared.state.read().await;
        self.available_locked(&state, offset, max)
    }

    fn available_locked(&self, state: &TorrentState, offset: u64, max: u64) -> u64 {
        let mut left = max.min(self.length.saturating_sub(offset));
        let mut off = self.offset + offset;
        let mut available = 0;
        while left > 0 {
            let Some(request) = state.offset_request(off) else {
                break;
            };
            if !self.responsive && !state.piece_complete(request.index) {
                break;
            }
            if !state.have_chunk(&request) {
                break;
            }
            let len = request.length as u64 - (off - state.request_offset(&request));
            let taken = len.min(left);
            left -= taken;
            available += taken;
            off += len;
        }
        available
    }

    /// Close the reader and retract its demand. Closing twice is harmless.
    pub async fn close(&mut self) {
        if self.deregistered {
            return;
        }
        self.closed.cancel();
        self.deregistered = true;
        self.shared.state.write().await.delete_reader(self.id);
        debug!("Closed {}", self.id);
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.deregistered {
            return;
        }
        self.closed.cancel();
        if let Ok(mut state) = self.shared.state.try_write() {
            state.delete_reader(self.id);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.shared.clone();
                let id = self.id;
                handle.spawn(async move {
                    shared.state.write().await.delete_reader(id);
                });
            }
            Err(_) => warn!("{} dropped outside a runtime and stays registered", self.id),
        }
    }
}

/// Signals a blocked read waits on, subscribed under the state read guard
struct Waits {
    piece: PieceIndex,
    ready: Option<tokio::sync::watch::Receiver<u64>>,
    event: tokio::sync::watch::Receiver<u64>,
    download: tokio::sync::watch::Receiver<bool>,
    networking: tokio::sync::watch::Receiver<bool>,
}

impl Waits {
    fn subscribe(reader: &Reader, pos: u64) -> Self {
        let signals = &reader.shared.signals;
        let piece = reader.torrent_piece(pos);
        Self {
            piece,
            ready: signals.subscribe_piece(piece),
            event: signals.subscribe_event(),
            download: signals.subscribe_data_download(),
            networking: signals.subscribe_networking(),
        }
    }
}

/// Closes a reader from another task
#[derive(Clone)]
pub struct ReaderCloser {
    id: ReaderId,
    shared: Arc<Shared>,
    closed: CancellationToken,
}

impl fmt::Debug for ReaderCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderCloser").field("id", &self.id).finish()
    }
}

impl ReaderCloser {
    /// Close the reader, failing any blocked read with `ReaderClosed`
    pub async fn close(&self) {
        self.closed.cancel();
        if self.shared.state.write().await.delete_reader(self.id) {
            debug!("Closed {} from another task", self.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
