//! CLI module
//!
//! Command-line interface for the torrent streamer.

pub mod args;
pub mod config;

pub use args::CliArgs;
pub use config::{Config, ReadaheadMode};
