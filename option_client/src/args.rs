//! Command-line arguments for the option quote client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to a text file with one contract key per line (`#` starts a comment).
    #[clap(long)]
    pub contracts: String,

    /// Optional JSON file with streaming settings; missing keys keep their defaults.
    #[clap(long)]
    pub config: Option<String>,

    /// Seconds between status/quote printouts.
    #[clap(long, default_value_t = 5)]
    pub poll_secs: u64,

    /// Append every raw frame to this JSON-lines file.
    #[clap(long)]
    pub frame_log: Option<String>,

    /// Milliseconds between simulated data frames.
    #[clap(long, default_value_t = 500)]
    pub tick_ms: u64,

    /// Comma-separated field names to print, e.g. `bidPrice,askPrice,delta`.
    #[clap(long, value_delimiter = ',')]
    pub show: Vec<String>,

    /// Print at most this many quote rows per refresh.
    #[clap(long, default_value_t = 20)]
    pub rows: usize,
}
