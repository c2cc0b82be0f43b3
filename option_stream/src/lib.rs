//! Real-time options quote streaming engine.
//!
//! The engine keeps a live, last-value-wins view of option quotes fed by a vendor
//! streaming transport. Its building blocks:
//!
//! - `supervisor`: `StreamingManager`, the session state machine and public API
//!   (`start`, `stop`, `get_status`, `get_latest_data`).
//! - `dispatcher`: non-blocking frame queue and the single consumer that decodes frames
//!   into the store.
//! - `store`: `QuoteStore`, typed per-contract records behind one mutex.
//! - `monitor`: lock-free liveness timestamps and the periodic staleness check.
//! - `reconnect`: fixed and exponential reconnect delay policies.
//! - `transport`: the collaborator traits a vendor session implements.
//! - `simulated`: a synthetic feed implementing those traits.
//! - `config`: `StreamConfig` with defaults and JSON loading.
//! - `journal`: optional raw frame mirror for diagnostics.
//!
//! Concurrency: std threads, crossbeam channels (`select!` with a per-session shutdown
//! channel for cancellation) and parking_lot mutexes.
#![warn(missing_docs)]
pub mod config;
pub mod dispatcher;
pub mod journal;
pub mod monitor;
pub mod reconnect;
pub mod simulated;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use config::StreamConfig;
pub use simulated::{SimulatedConfig, SimulatedFeed};
pub use store::{QuoteRecord, QuoteStore};
pub use supervisor::{SessionState, StreamStatus, StreamingManager};
pub use transport::{MessageCallback, SubscribeMode, Transport, TransportHandle};
