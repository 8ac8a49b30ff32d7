use std::io::{self, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::timeout;
use torrent_stream::torrent::TorrentFile;
use torrent_stream::{
    FileStore, MemoryStore, PieceIndex, PieceRange, PieceStore, StorageType, StreamError, Torrent,
    TorrentConfig, TorrentInfo,
};

const WAIT: Duration = Duration::from_secs(1);

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Memory store whose reads can be made to fail or come back empty
struct FlakyStore {
    inner: MemoryStore,
    failing_reads: AtomicUsize,
    empty_reads: AtomicBool,
    reads: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing_reads: AtomicUsize::new(0),
            empty_reads: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PieceStore for FlakyStore {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.empty_reads.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            if failing != usize::MAX {
                self.failing_reads.store(failing - 1, Ordering::SeqCst);
            }
            return Err(io::Error::new(io::ErrorKind::Other, "bad sector"));
        }
        self.inner.read_at(buf, offset).await
    }

    async fn write_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        self.inner.write_at(data, offset).await
    }

    async fn piece_completion(&self, index: PieceIndex) -> io::Result<bool> {
        self.inner.piece_completion(index).await
    }

    fn storage_type(&self) -> StorageType {
        self.inner.storage_type()
    }
}

// 64 bytes in pieces of 8, chunks of 4, fully stored and verified
async fn flaky_torrent() -> (Torrent, Arc<FlakyStore>, Vec<u8>) {
    let data = content(64);
    let info = TorrentInfo::from_content("flaky", 8, None, &data).unwrap();
    let store = Arc::new(FlakyStore::new(MemoryStore::with_content(&info, &data).unwrap()));
    let config = TorrentConfig::default().with_chunk_size(4);
    let torrent = Torrent::new(info, store.clone(), config).unwrap();
    assert_eq!(torrent.verify_data().await.unwrap(), 8);
    (torrent, store, data)
}

#[tokio::test]
async fn read_failure_demotes_corrupted_piece_until_refetched() {
    let (torrent, store, data) = flaky_torrent().await;
    store.inner.corrupt(17, &[0xee]).await.unwrap();
    store.fail_next_reads(1);

    let mut reader = torrent.new_reader().await;
    reader.seek(SeekFrom::Start(16)).await.unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        (n, buf)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    assert!(!torrent.piece_complete(2).await);
    let observer = torrent.new_reader().await;
    assert_eq!(observer.available(16, 8).await, 0);
    assert_eq!(observer.available(8, 8).await, 8);

    torrent.write_piece(2, &data[16..24]).await.unwrap();
    let (n, buf) = timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(n, 8);
    assert_eq!(&buf, &data[16..24]);
    assert_eq!(observer.available(16, 8).await, 8);
}

#[tokio::test]
async fn transient_read_failure_is_retried() {
    let (torrent, store, data) = flaky_torrent().await;
    store.fail_next_reads(2);

    let mut reader = torrent.new_reader().await;
    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 8);
    assert_eq!(&buf, &data[..8]);
    assert!(torrent.piece_complete(0).await);
}

#[tokio::test]
async fn persistent_read_failure_propagates() {
    let (torrent, store, _) = flaky_torrent().await;
    store.fail_next_reads(usize::MAX);

    let mut reader = torrent.new_reader().await;
    let mut buf = [0u8; 8];
    let err = timeout(WAIT, reader.read(&mut buf)).await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::StorageReadFailure { piece: 0, .. }));
    assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    assert_eq!(reader.position(), 0);
}

#[tokio::test]
async fn empty_storage_read_is_reported() {
    let (torrent, store, _) = flaky_torrent().await;
    store.empty_reads.store(true, Ordering::SeqCst);

    let mut reader = torrent.new_reader().await;
    reader.seek(SeekFrom::Start(12)).await.unwrap();
    let mut buf = [0u8; 4];
    let err = reader.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, StreamError::UnexpectedEndOfStream { offset: 12 }));
}

#[tokio::test]
async fn written_content_reads_back_exactly() {
    let data = content(100);
    let info = TorrentInfo::from_content("round", 16, None, &data).unwrap();
    let store = Arc::new(MemoryStore::new(&info));
    let torrent = Torrent::new(info, store, TorrentConfig::default().with_chunk_size(4)).unwrap();
    let file = torrent.file(0).unwrap().clone();
    assert_eq!(file.bytes_left().await, 100);

    // pieces arrive out of order
    for piece in [3, 0, 6, 1, 5, 2, 4] {
        let start = piece * 16;
        let end = (start + 16).min(100);
        torrent.write_piece(piece, &data[start..end]).await.unwrap();
    }
    assert_eq!(file.bytes_left().await, 0);
    assert_eq!(file.bytes_completed().await, 100);

    let mut reader = file.new_reader().await;
    let mut out = Vec::new();
    assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 100);
    assert_eq!(out, data);
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn sequential_reader_follows_arriving_pieces() {
    let data = content(48);
    let info = TorrentInfo::from_content("seq", 8, None, &data).unwrap();
    let store = Arc::new(MemoryStore::new(&info));
    let torrent = Torrent::new(info, store, TorrentConfig::default().with_chunk_size(4)).unwrap();

    let mut reader = torrent.new_reader().await;
    reader.set_adaptive_readahead().await;
    let consumer = tokio::spawn(async move {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.map(|_| out)
    });

    for piece in 0..6 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        torrent.write_piece(piece, &data[piece * 8..piece * 8 + 8]).await.unwrap();
    }

    let out = timeout(WAIT, consumer).await.unwrap().unwrap().unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn readers_of_different_files_wake_independently() {
    let data = content(32);
    let files = vec![
        TorrentFile { path: vec!["first".to_string()], length: 12 },
        TorrentFile { path: vec!["second".to_string()], length: 20 },
    ];
    let info = TorrentInfo::from_content("pair", 8, Some(files), &data).unwrap();
    let store = Arc::new(MemoryStore::new(&info));
    let torrent = Torrent::new(info, store, TorrentConfig::default().with_chunk_size(8)).unwrap();

    let mut first = torrent.file(0).unwrap().new_reader().await;
    let mut second = torrent.file(1).unwrap().new_reader().await;
    second.seek(SeekFrom::Start(10)).await.unwrap();

    let a = tokio::spawn(async move {
        let mut buf = [0u8; 4];
        first.read(&mut buf).await.map(|n| buf[..n].to_vec())
    });
    let b = tokio::spawn(async move {
        let mut buf = [0u8; 4];
        second.read(&mut buf).await.map(|n| buf[..n].to_vec())
    });

    // second file byte 10 is torrent byte 22, in piece 2
    torrent.write_piece(2, &data[16..24]).await.unwrap();
    let got = timeout(WAIT, b).await.unwrap().unwrap().unwrap();
    assert_eq!(got, &data[22..24]);
    assert!(!a.is_finished());

    torrent.write_piece(0, &data[..8]).await.unwrap();
    let got = timeout(WAIT, a).await.unwrap().unwrap().unwrap();
    assert_eq!(got, &data[..4]);
}

#[tokio::test]
async fn demand_changes_track_reader_progress() {
    let data = content(64);
    let info = TorrentInfo::from_content("demand", 8, None, &data).unwrap();
    let store = Arc::new(MemoryStore::with_content(&info, &data).unwrap());
    let torrent = Torrent::new(info, store, TorrentConfig::default().with_default_readahead(16)).unwrap();
    torrent.verify_data().await.unwrap();
    let mut changes = torrent.subscribe_demand().await;

    let mut reader = torrent.new_reader().await;
    let mut buf = [0u8; 8];
    reader.read(&mut buf).await.unwrap();
    reader.seek(SeekFrom::Start(40)).await.unwrap();
    reader.read(&mut buf).await.unwrap();
    reader.close().await;

    let ranges: Vec<(PieceRange, PieceRange)> =
        std::iter::from_fn(|| changes.try_recv().ok()).map(|c| (c.from, c.to)).collect();
    assert_eq!(
        ranges,
        vec![
            (PieceRange::default(), PieceRange::new(0, 2)),
            (PieceRange::new(0, 2), PieceRange::new(1, 3)),
            (PieceRange::new(1, 3), PieceRange::default()),
            (PieceRange::default(), PieceRange::new(5, 7)),
            (PieceRange::new(5, 7), PieceRange::new(6, 8)),
            (PieceRange::new(6, 8), PieceRange::default()),
        ]
    );
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let data = content(40);
    let files = vec![
        TorrentFile { path: vec!["x.bin".to_string()], length: 15 },
        TorrentFile { path: vec!["nested".to_string(), "y.bin".to_string()], length: 25 },
    ];
    let info = TorrentInfo::from_content("disk", 8, Some(files), &data).unwrap();

    {
        let store = FileStore::new(temp_dir.path().to_path_buf(), &info).unwrap();
        store.create_files().await.unwrap();
        let torrent = Torrent::new(info.clone(), Arc::new(store), TorrentConfig::default()).unwrap();
        assert_eq!(torrent.verify_data().await.unwrap(), 0);
        for piece in [0, 1, 3] {
            torrent.write_piece(piece, &data[piece * 8..piece * 8 + 8]).await.unwrap();
        }
    }

    let store = FileStore::new(temp_dir.path().to_path_buf(), &info).unwrap();
    let torrent = Torrent::new(info, Arc::new(store), TorrentConfig::default()).unwrap();
    assert_eq!(torrent.verify_data().await.unwrap(), 3);

    // x.bin lies in pieces 0 and 1, both present
    let x = torrent.file(0).unwrap();
    assert_eq!(x.bytes_left().await, 0);
    let mut out = Vec::new();
    x.new_reader().await.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, &data[..15]);

    // y.bin is missing piece 2 and 4
    let y = torrent.file(1).unwrap();
    assert_eq!(y.bytes_left().await, 16);
    torrent.disallow_data_download();
    let mut reader = y.new_reader().await;
    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
    let err = reader.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, StreamError::DownloadingDisabled));
}
