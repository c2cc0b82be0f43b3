//! Transport collaborator seam.
//!
//! The vendor session object (socket connect, login handshake, frame delivery) lives
//! outside this crate. The supervisor only needs to open a session, register the
//! delivery callback, send one batched subscribe and close it again.

use std::sync::Arc;

use option_common::Result;
use strum_macros::Display;

/// Delivery callback for inbound text frames.
///
/// Invoked on the transport's own read thread for every frame; implementations behind
/// it must return immediately.
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// How a subscribe request combines with what is already subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SubscribeMode {
    /// Add the keys to the current set.
    Add,
}

/// Factory for authenticated streaming sessions.
pub trait Transport: Send + Sync {
    /// Open a session ready to accept subscriptions.
    fn connect(&self) -> Result<Box<dyn TransportHandle>>;
}

/// One open streaming session.
pub trait TransportHandle: Send {
    /// Register the callback that receives every inbound frame.
    fn on_message(&mut self, callback: MessageCallback);

    /// Subscribe wire-form `keys` for the given field ids.
    fn subscribe(&mut self, keys: &[String], fields: &[u16], mode: SubscribeMode) -> Result<()>;

    /// Tear the session down. May block; callers bound the wait.
    fn close(&mut self) -> Result<()>;
}
