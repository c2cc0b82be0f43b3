//!
//! Common types and utilities shared by the streaming engine and its clients.
//!
//! This crate aggregates:
//! - `error`: unified error type `StreamError` used across the workspace.
//! - `result`: handy `Result<T, StreamError>` alias.
//! - `contract`: contract key codec between the REST and wire encodings.
//! - `fields`: wire field catalog: field ids, semantic names, display columns.
//! - `frame`: JSON frames delivered by the streaming transport.
#![warn(missing_docs)]
pub mod contract;
pub mod error;
pub mod fields;
pub mod frame;
pub mod result;

pub use contract::{ContractKey, OptionType, QuoteKey, decode_any};
pub use error::StreamError;
pub use fields::{FieldCatalog, FieldName, FieldValue};
pub use frame::StreamFrame;
pub use result::Result;
