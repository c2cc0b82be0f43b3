//! Error types shared across the streaming workspace.
//!
//! The `StreamError` enum unifies the failure cases of the key codec, the field
//! catalog, frame decoding, the transport collaborator and configuration, so every
//! crate can propagate a single error type with `?`.
use std::io;

use thiserror::Error;

/// Unified error type shared by the common, stream and client crates.
#[derive(Error, Debug)]
pub enum StreamError {
    /// I/O error originating from files (contracts list, config, frame journal).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A contract key could not be built from its parts or parsed strictly.
    #[error("Invalid contract key: {0}")]
    InvalidContract(String),

    /// A line of the contracts file did not decode to a contract key.
    #[error("Parse contracts file error: {0}")]
    ParseContractsFile(String),

    /// A field value on the wire did not match the type of its semantic field.
    #[error("Field decode error: {field}: {reason}")]
    FieldDecode {
        /// Semantic field name.
        field: String,
        /// What was wrong with the value.
        reason: String,
    },

    /// Static configuration is inconsistent (field tables, timings, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport collaborator failed to connect or tear down.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The batched subscribe request could not be sent.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Crossbeam/channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),
}
