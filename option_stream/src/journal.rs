//! Append-only diagnostic log of raw inbound frames.
//!
//! One JSON object per line: `{"received_at":"<RFC 3339>","frame":"<raw text>"}`.
//! Not part of the functional contract; nothing reads it back.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use option_common::Result;
use serde::Serialize;

#[derive(Serialize)]
struct JournalEntry<'a> {
    received_at: String,
    frame: &'a str,
}

/// Frame mirror backed by a file opened in append mode.
pub struct FrameJournal {
    writer: BufWriter<File>,
}

impl FrameJournal {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one raw frame stamped with the current time.
    pub fn record(&mut self, raw: &str) -> Result<()> {
        let entry = JournalEntry {
            received_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            frame: raw,
        };
        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
