//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the torrent streamer
#[derive(Debug, Parser)]
#[command(name = "torrent-stream")]
#[command(about = "Stream the content of a locally stored torrent", long_about = None)]
pub struct CliArgs {
    /// Path to the .torrent file
    #[arg(value_name = "TORRENT_FILE")]
    pub torrent_file: PathBuf,

    /// Directory holding the torrent's data
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Index of the file to stream (whole torrent if omitted)
    #[arg(short, long, value_name = "INDEX")]
    pub file: Option<usize>,

    /// Byte offset to start streaming from
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to stream (to the end if omitted)
    #[arg(long)]
    pub length: Option<u64>,

    /// Readahead in bytes
    #[arg(long, value_name = "BYTES")]
    pub readahead: Option<u64>,

    /// Grow readahead with the length of the sequential read
    #[arg(long, conflicts_with = "readahead")]
    pub adaptive_readahead: bool,

    /// Read chunks that are stored but not verified yet
    #[arg(long)]
    pub responsive: bool,

    /// Print per-file status as JSON instead of streaming
    #[arg(long)]
    pub status: bool,

    /// Write streamed bytes to this file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Chunk size in bytes
    #[arg(long, default_value_t = 16384)]
    pub chunk_size: u32,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["torrent-stream", "test.torrent"]).unwrap();

        assert_eq!(args.torrent_file, PathBuf::from("test.torrent"));
        assert_eq!(args.offset, 0);
        assert_eq!(args.chunk_size, 16384);
        assert!(args.file.is_none());
        assert!(args.length.is_none());
        assert!(!args.status);
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_stream_options() {
        let args = CliArgs::try_parse_from([
            "torrent-stream",
            "movie.torrent",
            "--data-dir",
            "/data",
            "--file",
            "2",
            "--offset",
            "100",
            "--length",
            "50",
            "--adaptive-readahead",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.data_dir, Some(PathBuf::from("/data")));
        assert_eq!(args.file, Some(2));
        assert_eq!(args.offset, 100);
        assert_eq!(args.length, Some(50));
        assert!(args.adaptive_readahead);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_conflicting_options() {
        assert!(CliArgs::try_parse_from([
            "torrent-stream",
            "x.torrent",
            "--readahead",
            "10",
            "--adaptive-readahead"
        ])
        .is_err());
        assert!(CliArgs::try_parse_from(["torrent-stream", "x.torrent", "-v", "-q"]).is_err());
    }
}
