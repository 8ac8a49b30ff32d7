//! torrent-stream - Main entry point
//!
//! Streams a byte range of a locally stored torrent, or prints how much of
//! each file is present.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use torrent_stream::cli::ReadaheadMode;
use torrent_stream::{
    CliArgs, Config, FilePieceState, FileStore, Reader, StreamError, Torrent, TorrentParser,
};
use tracing::{debug, error, info, trace};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

/// Per-file status printed with --status
#[derive(Debug, Serialize)]
struct FileStatus {
    index: usize,
    path: String,
    length: u64,
    bytes_completed: u64,
    pieces: Vec<FilePieceState>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("torrent-stream starting");
    debug!("CLI arguments: {:?}", args);

    let torrent_info = TorrentParser::parse_file(&args.torrent_file)
        .context("Failed to load torrent file")?;

    let config = Config::from_args(&args, torrent_info.clone());
    config.validate().context("Invalid configuration")?;

    let storage = FileStore::new(config.data_dir.clone(), &torrent_info)
        .context("Invalid torrent file layout")?;
    let torrent = Torrent::new(torrent_info, Arc::new(storage), config.torrent_config())
        .context("Failed to open torrent")?;

    // nothing can be fetched, so reads of missing pieces fail instead of blocking
    torrent.disallow_data_download();
    let complete = torrent.verify_data().await.context("Failed to verify torrent data")?;
    debug!("{} of {} pieces present", complete, torrent.num_pieces());

    let result = if config.status {
        print_status(&torrent).await
    } else {
        stream(&torrent, &config).await
    };

    torrent.close();
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level {:?}", level);
}

async fn print_status(torrent: &Torrent) -> Result<()> {
    let mut statuses = Vec::with_capacity(torrent.files().len());
    for file in torrent.files() {
        statuses.push(FileStatus {
            index: file.index(),
            path: file.display_path().to_string(),
            length: file.length(),
            bytes_completed: file.bytes_completed().await,
            pieces: file.state().await,
        });
    }
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}

async fn open_reader(torrent: &Torrent, config: &Config) -> Result<Reader> {
    let mut reader = match config.file {
        Some(index) => {
            let file = torrent
                .file(index)
                .ok_or_else(|| anyhow::anyhow!("No file with index {}", index))?;
            info!("Streaming {} ({} bytes)", file.display_path(), file.length());
            file.new_reader().await
        }
        None => {
            info!("Streaming {} ({} bytes)", torrent.info().name, torrent.total_length());
            torrent.new_reader().await
        }
    };

    if config.readahead == ReadaheadMode::Adaptive {
        reader.set_adaptive_readahead().await;
    }
    if config.responsive {
        reader.set_responsive();
    }
    reader.seek(SeekFrom::Start(config.offset)).await?;
    Ok(reader)
}

async fn stream(torrent: &Torrent, config: &Config) -> Result<()> {
    let mut reader = open_reader(torrent, config).await?;

    let mut output: Box<dyn AsyncWrite + Unpin + Send> = match &config.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create output file '{}'", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut remaining = config.stream_length();
    let mut buf = vec![0u8; config.chunk_size as usize];
    let mut written = 0u64;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(StreamError::DownloadingDisabled) => {
                let offset = config.offset + written;
                reader.close().await;
                return Err(anyhow::anyhow!(
                    "Data at offset {} is not present in {}",
                    offset,
                    config.data_dir.display()
                ));
            }
            Err(e) => {
                reader.close().await;
                return Err(e).context("Read failed");
            }
        };
        output.write_all(&buf[..n]).await.context("Failed to write output")?;
        trace!("Wrote {} bytes", n);
        remaining -= n as u64;
        written += n as u64;
    }
    output.flush().await?;
    reader.close().await;

    info!("Streamed {} bytes", written);
    Ok(())
}
