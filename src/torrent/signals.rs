//! Torrent-wide signals
//!
//! Broadcast conditions that blocked readers compose into their wait set:
//! torrent closure, the two enable flags, one readiness counter per piece
//! and a generic "something changed" event.
//!
//! Readiness is a generation counter in a `watch` channel. A waiter
//! subscribes while it still holds the state read guard, so any broadcast
//! made after its availability check marks the receiver as changed.

use std::future::pending;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::geometry::PieceIndex;

/// Signals shared by every reader of a torrent
#[derive(Debug)]
pub struct Signals {
    closed: CancellationToken,
    data_download_allowed: watch::Sender<bool>,
    networking_enabled: watch::Sender<bool>,
    pieces: Vec<watch::Sender<u64>>,
    event: watch::Sender<u64>,
}

impl Signals {
    /// Create signals for a torrent with `num_pieces` pieces
    pub fn new(num_pieces: usize) -> Self {
        Self {
            closed: CancellationToken::new(),
            data_download_allowed: watch::channel(true).0,
            networking_enabled: watch::channel(true).0,
            pieces: (0..num_pieces).map(|_| watch::channel(0).0).collect(),
            event: watch::channel(0).0,
        }
    }

    /// Token cancelled when the torrent closes
    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Close the torrent, waking every waiter
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Check if the torrent is closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Set whether data may be downloaded, returning true on change
    pub fn set_data_download_allowed(&self, allowed: bool) -> bool {
        let changed = set_flag(&self.data_download_allowed, allowed);
        if changed {
            debug!("Data download allowed: {}", allowed);
        }
        changed
    }

    /// Check if data may be downloaded
    pub fn data_download_allowed(&self) -> bool {
        *self.data_download_allowed.borrow()
    }

    /// Observe the data download flag
    pub fn subscribe_data_download(&self) -> watch::Receiver<bool> {
        self.data_download_allowed.subscribe()
    }

    /// Set whether networking is enabled, returning true on change
    pub fn set_networking_enabled(&self, enabled: bool) -> bool {
        let changed = set_flag(&self.networking_enabled, enabled);
        if changed {
            debug!("Networking enabled: {}", enabled);
        }
        changed
    }

    /// Check if networking is enabled
    pub fn networking_enabled(&self) -> bool {
        *self.networking_enabled.borrow()
    }

    /// Observe the networking flag
    pub fn subscribe_networking(&self) -> watch::Receiver<bool> {
        self.networking_enabled.subscribe()
    }

    /// Wake everyone waiting on a piece
    pub fn piece_ready(&self, index: PieceIndex) {
        if let Some(sender) = self.pieces.get(index) {
            trace!("Broadcasting readiness of piece {}", index);
            sender.send_modify(|generation| *generation = generation.wrapping_add(1));
        }
    }

    /// Observe readiness of a piece
    pub fn subscribe_piece(&self, index: PieceIndex) -> Option<watch::Receiver<u64>> {
        self.pieces.get(index).map(|sender| sender.subscribe())
    }

    /// Wake every waiter regardless of piece
    pub fn broadcast_event(&self) {
        self.event
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Observe torrent-wide events
    pub fn subscribe_event(&self) -> watch::Receiver<u64> {
        self.event.subscribe()
    }
}

fn set_flag(sender: &watch::Sender<bool>, value: bool) -> bool {
    sender.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    })
}

/// Resolve once the flag observed by `rx` is false
pub async fn wait_disabled(mut rx: watch::Receiver<bool>) {
    let disabled = rx.wait_for(|enabled| !*enabled).await.is_ok();
    if !disabled {
        pending::<()>().await;
    }
}

/// Resolve on the next broadcast after the receiver was created.
///
/// A missing receiver never resolves.
pub async fn wait_changed(rx: Option<watch::Receiver<u64>>) {
    let Some(mut rx) = rx else {
        return pending::<()>().await;
    };
    if rx.changed().await.is_err() {
        pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_flags_report_change() {
        let signals = Signals::new(2);
        assert!(signals.data_download_allowed());
        assert!(!signals.set_data_download_allowed(true));
        assert!(signals.set_data_download_allowed(false));
        assert!(!signals.data_download_allowed());

        assert!(signals.set_networking_enabled(false));
        assert!(!signals.networking_enabled());
    }

    #[tokio::test]
    async fn test_piece_ready_wakes_subscriber() {
        let signals = Signals::new(3);
        let rx = signals.subscribe_piece(1);
        signals.piece_ready(1);
        assert!(timeout(Duration::from_millis(100), wait_changed(rx)).await.is_ok());
    }

    #[tokio::test]
    async fn test_other_piece_does_not_wake() {
        let signals = Signals::new(3);
        let rx = signals.subscribe_piece(1);
        signals.piece_ready(2);
        assert!(timeout(Duration::from_millis(50), wait_changed(rx)).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_before_subscribe_is_not_seen() {
        let signals = Signals::new(1);
        signals.piece_ready(0);
        let rx = signals.subscribe_piece(0);
        assert!(timeout(Duration::from_millis(50), wait_changed(rx)).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_disabled() {
        let signals = Signals::new(0);
        let rx = signals.subscribe_networking();
        assert!(timeout(Duration::from_millis(50), wait_disabled(rx)).await.is_err());

        signals.set_networking_enabled(false);
        let rx = signals.subscribe_networking();
        assert!(timeout(Duration::from_millis(50), wait_disabled(rx)).await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_piece_never_resolves() {
        let signals = Signals::new(1);
        assert!(signals.subscribe_piece(5).is_none());
        assert!(timeout(Duration::from_millis(20), wait_changed(None)).await.is_err());
    }
}
