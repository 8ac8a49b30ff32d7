//! CLI configuration module
//!
//! Manages configuration for the CLI application.

use crate::cli::args::CliArgs;
use crate::torrent::{TorrentConfig, TorrentInfo};
use anyhow::Result;
use std::path::PathBuf;

/// Readahead requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadaheadMode {
    /// The store's default readahead
    Default,
    /// A fixed byte count
    Fixed(u64),
    /// Grow with the sequential read
    Adaptive,
}

/// Configuration for the torrent streamer
#[derive(Debug, Clone)]
pub struct Config {
    /// Torrent information
    pub torrent_info: TorrentInfo,
    /// Directory holding the torrent's data
    pub data_dir: PathBuf,
    /// File to stream, or the whole torrent
    pub file: Option<usize>,
    /// Start of the streamed range, relative to the file or torrent
    pub offset: u64,
    /// Length of the streamed range, to the end if None
    pub length: Option<u64>,
    pub readahead: ReadaheadMode,
    pub responsive: bool,
    /// Print status instead of streaming
    pub status: bool,
    /// Output file, stdout if None
    pub output: Option<PathBuf>,
    pub chunk_size: u32,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs, torrent_info: TorrentInfo) -> Self {
        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        let readahead = if args.adaptive_readahead {
            ReadaheadMode::Adaptive
        } else if let Some(n) = args.readahead {
            ReadaheadMode::Fixed(n)
        } else {
            ReadaheadMode::Default
        };

        Self {
            torrent_info,
            data_dir,
            file: args.file,
            offset: args.offset,
            length: args.length,
            readahead,
            responsive: args.responsive,
            status: args.status,
            output: args.output.clone(),
            chunk_size: args.chunk_size,
        }
    }

    /// Length of the selected file, or of the whole torrent
    pub fn target_length(&self) -> Option<u64> {
        match self.file {
            Some(index) => self.torrent_info.files_iter().nth(index).map(|f| f.length),
            None => Some(self.torrent_info.total_size()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk_size must be positive"));
        }

        let target = self.target_length().ok_or_else(|| {
            anyhow::anyhow!(
                "file index {} out of range, torrent has {} files",
                self.file.unwrap_or_default(),
                self.torrent_info.files_iter().count()
            )
        })?;

        if self.offset > target {
            return Err(anyhow::anyhow!(
                "offset {} is past the end of the {} byte range",
                self.offset,
                target
            ));
        }
        if let Some(length) = self.length {
            if self.offset + length > target {
                return Err(anyhow::anyhow!(
                    "range [{}, {}) exceeds the {} byte range",
                    self.offset,
                    self.offset + length,
                    target
                ));
            }
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("data_dir cannot be empty"));
        }

        Ok(())
    }

    /// Number of bytes to stream
    pub fn stream_length(&self) -> u64 {
        let target = self.target_length().unwrap_or_default();
        self.length
            .unwrap_or_else(|| target.saturating_sub(self.offset))
    }

    /// Content store configuration
    pub fn torrent_config(&self) -> TorrentConfig {
        let config = TorrentConfig::default().with_chunk_size(self.chunk_size);
        match self.readahead {
            ReadaheadMode::Fixed(n) => config.with_default_readahead(n),
            _ => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::torrent::TorrentFile;

    fn torrent_info() -> TorrentInfo {
        let files = vec![
            TorrentFile { path: vec!["a".to_string()], length: 30 },
            TorrentFile { path: vec!["b".to_string()], length: 70 },
        ];
        TorrentInfo::from_content("test_torrent", 16, Some(files), &[0u8; 100]).unwrap()
    }

    fn config(extra: &[&str]) -> Config {
        let mut argv = vec!["torrent-stream", "test.torrent"];
        argv.extend_from_slice(extra);
        let args = CliArgs::try_parse_from(argv).unwrap();
        Config::from_args(&args, torrent_info())
    }

    #[test]
    fn test_config_from_args() {
        let config = config(&["--data-dir", "/tmp/data", "--readahead", "4096", "--responsive", "-f", "1"]);

        assert_eq!(config.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.readahead, ReadaheadMode::Fixed(4096));
        assert!(config.responsive);
        assert_eq!(config.file, Some(1));
        assert_eq!(config.target_length(), Some(70));
        assert_eq!(config.torrent_config().default_readahead, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_defaults() {
        let config = config(&[]);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.readahead, ReadaheadMode::Default);
        assert_eq!(config.stream_length(), 100);
        assert_eq!(config.torrent_config(), TorrentConfig::default());
    }

    #[test]
    fn test_stream_length() {
        assert_eq!(config(&["-f", "0", "--offset", "10"]).stream_length(), 20);
        assert_eq!(config(&["--offset", "10", "--length", "5"]).stream_length(), 5);
    }

    #[test]
    fn test_config_validate_invalid_ranges() {
        assert!(config(&["-f", "2"]).validate().is_err());
        assert!(config(&["-f", "0", "--offset", "31"]).validate().is_err());
        assert!(config(&["--offset", "90", "--length", "11"]).validate().is_err());
        assert!(config(&["--offset", "100"]).validate().is_ok());
        assert!(config(&["--chunk-size", "0"]).validate().is_err());
    }
}
