//! Option Quote Client: runs a supervised quote stream for a list of option contracts and
//! prints the live view to stdout.
//!
//! It reads contract keys from a text file, starts a `StreamingManager` on top of the
//! simulated vendor feed, and periodically prints the stream status and the latest quote
//! of every contract until Ctrl+C.
//!
//! Usage example (CLI):
//! ```bash
//! option_client --contracts ./contracts.txt --config ./stream.json --show bidPrice,askPrice,delta
//! ```
//!
//! The contracts file holds one key per line in REST (`AAPL_240621C190`) or wire
//! (`AAPL  240621C00190000`) form. Set `RUST_LOG=debug` for per-frame diagnostics.
#![warn(missing_docs)]
mod args;
mod render;

use crate::args::Args;
use crate::render::{columns_from_names, quote_table, status_line};
use clap::Parser;
use log::{error, info};
use option_common::contract::{ContractKey, ContractParser};
use option_common::{Result, StreamError};
use option_stream::{SessionState, SimulatedConfig, SimulatedFeed, StreamConfig, StreamingManager};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

const IDLE_SLEEP: Duration = Duration::from_millis(100);

fn main() -> Result<(), StreamError> {
    init_logger();
    let args = Args::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Stopping stream...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| StreamError::Format(format!("Error setting Ctrl+C handler: {e}")))?;
    }

    let mut config = match &args.config {
        Some(path) => StreamConfig::from_file(&normalize_path(path))?,
        None => StreamConfig::default(),
    };
    if let Some(frame_log) = &args.frame_log {
        config.frame_log = Some(normalize_path(frame_log));
    }

    let contracts = load_contracts(&normalize_path(&args.contracts))?;
    info!("Loaded {} contracts", contracts.len());

    let feed = Arc::new(SimulatedFeed::new(SimulatedConfig {
        tick: Duration::from_millis(args.tick_ms.max(1)),
        heartbeat_interval: config.heartbeat_interval(),
        fail_connect: false,
    }));
    let manager = StreamingManager::new(feed, config)?;
    if !manager.start(&contracts) {
        let status = manager.get_status();
        return Err(StreamError::Format(
            status.error_message.unwrap_or_else(|| "stream did not start".to_string()),
        ));
    }

    let columns = columns_from_names(&args.show);
    let refresh = Duration::from_secs(args.poll_secs.max(1));
    let mut last_print = Instant::now();
    info!("Client is running. Press Ctrl+C to exit.");

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(IDLE_SLEEP);
        if last_print.elapsed() < refresh {
            continue;
        }
        last_print = Instant::now();

        let status = manager.get_status();
        println!("{}", status_line(&status));
        println!("{}", quote_table(&manager.get_latest_data(), &columns, args.rows));
        if status.state == SessionState::Failed {
            error!(
                "Stream failed: {}",
                status.error_message.as_deref().unwrap_or("unknown error")
            );
            break;
        }
    }

    manager.stop();
    if let Ok(status) = serde_json::to_string(&manager.get_status()) {
        info!("Final status: {status}");
    }
    Ok(())
}

fn load_contracts(path: &Path) -> Result<Vec<ContractKey>> {
    if !is_file_exist(path) {
        return Err(StreamError::Format(format!(
            "Contracts file {} does not exist",
            path.display()
        )));
    }
    let reader = BufReader::new(File::open(path)?);
    ContractKey::parse_from_file(reader)
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Normalize a CLI-provided path string by trimming whitespace and matching quotes.
///
/// This allows passing Windows paths in quotes without breaking parsing.
fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let no_quotes = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    PathBuf::from(no_quotes)
}

/// Returns `true` if the provided path exists and is a regular file.
fn is_file_exist(path: &Path) -> bool {
    path.exists() && path.is_file()
}
