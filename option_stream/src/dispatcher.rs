//! Message dispatcher: decouples the transport's delivery callback from decoding.
//!
//! The transport pushes raw frames through a [`DispatcherHandle`] onto an unbounded
//! crossbeam channel; the push never blocks. A single [`MessageDispatcher`] drains the
//! channel on its own thread, in arrival order, and for each frame:
//!
//! - heartbeat/admin notifications: stamp the liveness tracker only;
//! - subscription replies: report success or failure to the session;
//! - data groups: normalize the contract key, translate field ids through the
//!   catalog and merge the values into the quote store.
//!
//! A frame that fails to decode is logged and reported; it never stops the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select, unbounded};
use log::{debug, error, warn};
use option_common::contract::decode_any;
use option_common::fields::FieldCatalog;
use option_common::frame::StreamFrame;
use option_common::{Result, StreamError};
use parking_lot::Mutex;

use crate::journal::FrameJournal;
use crate::monitor::LivenessTracker;
use crate::store::QuoteStore;
use crate::transport::MessageCallback;

/// Session-level reactions to what the dispatcher sees.
pub trait SessionEvents: Send + Sync {
    /// A subscription reply arrived.
    fn subscription_ack(&self, success: bool, message: &str);

    /// A frame could not be processed.
    fn frame_error(&self, error: &StreamError);
}

/// Counters shared between the dispatcher and status readers.
#[derive(Default)]
pub struct DispatchStats {
    messages_processed: AtomicU64,
    unmapped_total: AtomicU64,
    unmapped_ids: Mutex<HashMap<String, u64>>,
}

impl DispatchStats {
    /// Frames taken off the queue, including rejected ones.
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Field entries skipped because their id is not in the catalog.
    pub fn unmapped_fields(&self) -> u64 {
        self.unmapped_total.load(Ordering::Relaxed)
    }

    /// Skipped occurrences per unmapped id.
    pub fn unmapped_ids(&self) -> HashMap<String, u64> {
        self.unmapped_ids.lock().clone()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.messages_processed.store(0, Ordering::Relaxed);
        self.unmapped_total.store(0, Ordering::Relaxed);
        self.unmapped_ids.lock().clear();
    }

    fn record_unmapped(&self, id: &str) {
        self.unmapped_total.fetch_add(1, Ordering::Relaxed);
        let mut ids = self.unmapped_ids.lock();
        let seen = ids.entry(id.to_string()).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            warn!("Unmapped field id {id:?}; values for it are ignored");
        } else {
            debug!("Unmapped field id {id:?} seen {} times", *seen);
        }
    }
}

/// What one frame contained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Heartbeat notifications.
    pub heartbeats: usize,
    /// Other admin notifications and non-subscription replies.
    pub admin: usize,
    /// Subscription replies.
    pub acks: usize,
    /// Contract groups merged.
    pub groups: usize,
    /// Field values merged.
    pub fields_merged: usize,
    /// Field entries with ids outside the catalog.
    pub unmapped_fields: usize,
    /// Field values that failed to decode.
    pub field_errors: usize,
    /// Set when the whole frame was rejected.
    pub rejected: Option<String>,
}

/// Producer side; cheap to clone into the transport callback.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: Sender<String>,
}

impl DispatcherHandle {
    /// Queue a raw frame without blocking.
    ///
    /// Returns `false` if the dispatcher is gone; the frame is dropped and logged.
    pub fn enqueue(&self, raw: String) -> bool {
        match self.tx.send(raw) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dispatcher closed, dropping frame of {} bytes", e.0.len());
                false
            }
        }
    }

    /// Delivery callback for [`TransportHandle::on_message`](crate::transport::TransportHandle::on_message).
    pub fn callback(&self) -> MessageCallback {
        let handle = self.clone();
        Arc::new(move |raw| {
            handle.enqueue(raw);
        })
    }
}

/// Consumer side; owns the decode/merge step.
pub struct MessageDispatcher {
    rx: Receiver<String>,
    catalog: Arc<FieldCatalog>,
    store: Arc<QuoteStore>,
    liveness: Arc<LivenessTracker>,
    stats: Arc<DispatchStats>,
    events: Arc<dyn SessionEvents>,
    journal: Option<FrameJournal>,
}

/// Create a connected handle/dispatcher pair.
pub fn channel(
    catalog: Arc<FieldCatalog>,
    store: Arc<QuoteStore>,
    liveness: Arc<LivenessTracker>,
    stats: Arc<DispatchStats>,
    events: Arc<dyn SessionEvents>,
) -> (DispatcherHandle, MessageDispatcher) {
    let (tx, rx) = unbounded::<String>();
    let dispatcher = MessageDispatcher {
        rx,
        catalog,
        store,
        liveness,
        stats,
        events,
        journal: None,
    };
    (DispatcherHandle { tx }, dispatcher)
}

impl MessageDispatcher {
    /// Mirror every raw frame to `journal` before decoding it.
    pub fn with_journal(mut self, journal: FrameJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Frames waiting in the queue.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Wait up to `timeout` for one frame and apply it.
    ///
    /// `Ok(None)` on timeout; an error only when every handle has been dropped.
    pub fn process_next(&mut self, timeout: Duration) -> Result<Option<FrameOutcome>> {
        match self.rx.recv_timeout(timeout) {
            Ok(raw) => Ok(Some(self.dispatch(&raw))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(StreamError::ChannelRecv("dispatcher queue closed".to_string()))
            }
        }
    }

    /// Consumer loop. Returns when the shutdown channel closes or all handles are gone.
    pub fn run(mut self, shutdown_rx: Receiver<()>, poll: Duration) {
        debug!("Dispatcher started");
        let rx = self.rx.clone();
        loop {
            select! {
                recv(shutdown_rx) -> _ => break,
                recv(rx) -> msg => match msg {
                    Ok(raw) => {
                        self.dispatch(&raw);
                    }
                    Err(_) => break,
                },
                default(poll) => {}
            }
        }
        debug!("Dispatcher exiting, {} frames left unprocessed", self.pending());
    }

    fn dispatch(&mut self, raw: &str) -> FrameOutcome {
        self.stats.messages_processed.fetch_add(1, Ordering::Relaxed);
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.record(raw) {
                warn!("Frame journal write failed, disabling it: {e}");
                self.journal = None;
            }
        }

        match self.apply(raw) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Dropping frame that failed to decode: {e}");
                self.events.frame_error(&e);
                FrameOutcome {
                    rejected: Some(e.to_string()),
                    ..FrameOutcome::default()
                }
            }
        }
    }

    fn apply(&self, raw: &str) -> Result<FrameOutcome> {
        let frame = StreamFrame::parse(raw)?;
        let mut outcome = FrameOutcome::default();
        if frame.is_empty() {
            debug!("Frame without notify/response/data sections: {raw}");
        }

        for notify in &frame.notify {
            self.liveness.record_heartbeat();
            if notify.heartbeat.is_some() {
                outcome.heartbeats += 1;
            } else {
                outcome.admin += 1;
            }
        }

        for response in &frame.response {
            self.liveness.record_heartbeat();
            if response.is_subscription() {
                outcome.acks += 1;
                self.events
                    .subscription_ack(response.is_success(), &response.content.msg);
            } else {
                outcome.admin += 1;
                if !response.is_success() {
                    warn!(
                        "{} command failed with code {}: {}",
                        response.command, response.content.code, response.content.msg
                    );
                }
            }
        }

        for block in &frame.data {
            for group in &block.content {
                let key = decode_any(&group.key);
                let mut updates = Vec::with_capacity(group.fields.len());
                for (id, value) in &group.fields {
                    match self.catalog.decode(id, value) {
                        Ok(Some(update)) => updates.push(update),
                        Ok(None) => {
                            outcome.unmapped_fields += 1;
                            self.stats.record_unmapped(id);
                        }
                        Err(e) => {
                            outcome.field_errors += 1;
                            warn!("Skipping field {id} for {key}: {e}");
                        }
                    }
                }
                outcome.fields_merged += self.store.merge_all(key, updates);
                outcome.groups += 1;
            }
        }
        if outcome.fields_merged > 0 {
            self.liveness.record_data();
        }

        Ok(outcome)
    }
}
