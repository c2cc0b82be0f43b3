//! Result type alias shared across the workspace.
//!
//! This module defines a convenient alias that defaults the error type to the
//! common `StreamError`, so functions can simply return `Result<T>`.
use crate::error::StreamError;

/// Workspace-wide `Result` alias with `StreamError` as the default error.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;
