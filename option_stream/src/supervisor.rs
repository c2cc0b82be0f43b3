//! Connection supervisor: owns one streaming session at a time.
//!
//! `StreamingManager` drives the session state machine
//!
//! ```text
//! Idle -> Starting -> Subscribing -> Streaming -> Reconnecting -> Streaming
//!                                                 Reconnecting -> Failed
//! any  -> Stopping -> Stopped
//! ```
//!
//! and runs three workers per session, each on its own thread:
//!
//! - dispatcher: drains the inbound frame queue into the quote store;
//! - monitor: checks liveness every `monitor_interval` and schedules reconnects;
//! - start worker: connects the transport, registers the callback, subscribes.
//!
//! Every session gets a fresh generation number and a shutdown channel. Dropping the
//! sender wakes every worker of that session; results and replies that carry an older
//! generation are ignored.
//!
//! Locking: all session state sits behind one mutex. Helpers that need the state while
//! the caller already holds it take the guard (or `&mut Inner`) instead of locking again.
//! The quote store is only ever locked after the supervisor. Thread joins and transport
//! close run with the supervisor lock released, and both wait at most
//! `teardown_timeout`; a worker still blocked in the transport after that is detached.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, after, bounded, select};
use log::{debug, error, info, warn};
use option_common::contract::{ContractKey, QuoteKey};
use option_common::fields::FieldCatalog;
use option_common::{Result, StreamError};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::config::StreamConfig;
use crate::dispatcher::{self, DispatchStats, DispatcherHandle, SessionEvents};
use crate::journal::FrameJournal;
use crate::monitor::{LivenessThresholds, LivenessTracker, run_monitor};
use crate::reconnect::ReconnectionStrategy;
use crate::store::{QuoteRecord, QuoteStore};
use crate::transport::{SubscribeMode, Transport, TransportHandle};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize)]
pub enum SessionState {
    /// Never started.
    #[default]
    Idle,
    /// Connecting the transport.
    Starting,
    /// Transport ready, subscribe in flight.
    Subscribing,
    /// Subscribed and receiving.
    Streaming,
    /// Waiting to rerun the start sequence after a liveness failure.
    Reconnecting,
    /// Tearing down on request.
    Stopping,
    /// Stopped on request.
    Stopped,
    /// Setup failed or reconnects exhausted.
    Failed,
}

impl SessionState {
    /// `true` while a session is (being) established.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Starting
                | SessionState::Subscribing
                | SessionState::Streaming
                | SessionState::Reconnecting
        )
    }
}

/// Point-in-time view of the supervisor for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    #[allow(missing_docs)]
    pub state: SessionState,
    #[allow(missing_docs)]
    pub is_running: bool,
    /// Human-readable progress text.
    pub status_message: String,
    /// Latest error, kept until the next caller-initiated start.
    pub error_message: Option<String>,
    /// Contracts confirmed by the last successful subscription reply.
    pub subscribed_count: usize,
    /// Contracts with a record in the store.
    pub quote_count: usize,
    /// Frames taken off the dispatcher queue since start.
    pub messages_processed: u64,
    /// Field entries skipped because their id is unknown.
    pub unmapped_fields: u64,
    /// Reconnects made since the session last saw traffic.
    pub reconnect_attempts: u32,
    /// Wall-clock time of the latest store merge.
    pub last_data_update: Option<DateTime<Utc>>,
    /// Wall-clock time of the latest heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
enum Launch {
    Initial,
    Reconnect,
}

struct Session {
    generation: u64,
    shutdown_tx: Sender<()>,
    handle: Option<Box<dyn TransportHandle>>,
    workers: Vec<Worker>,
}

/// A session thread plus a channel that disconnects when its body returns or unwinds.
struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    status_message: String,
    error_message: Option<String>,
    /// Keys of the subscribe currently in flight.
    requested: Vec<ContractKey>,
    /// Keys of the last subscribe that went through.
    subscriptions: Vec<ContractKey>,
    subscribed_count: usize,
    reconnect_attempts: u32,
    generation: u64,
    session: Option<Session>,
}

struct Core {
    transport: Arc<dyn Transport>,
    config: StreamConfig,
    catalog: Arc<FieldCatalog>,
    strategy: Box<dyn ReconnectionStrategy>,
    store: Arc<QuoteStore>,
    liveness: Arc<LivenessTracker>,
    stats: Arc<DispatchStats>,
    inner: Mutex<Inner>,
}

/// Supervises one live quote stream: start, stop, status and the latest quotes.
///
/// None of the public methods return errors or panic; failures show up in
/// [`get_status`](Self::get_status). Dropping the manager stops the stream.
pub struct StreamingManager {
    core: Arc<Core>,
}

impl StreamingManager {
    /// Build an idle manager on top of `transport`.
    ///
    /// Fails when the configuration does not validate, e.g. when a subscription field
    /// has no decode entry.
    pub fn new(transport: Arc<dyn Transport>, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.field_catalog()?);
        let strategy = config.reconnect_strategy();
        let core = Core {
            transport,
            config,
            catalog,
            strategy,
            store: Arc::new(QuoteStore::new()),
            liveness: Arc::new(LivenessTracker::new()),
            stats: Arc::new(DispatchStats::default()),
            inner: Mutex::new(Inner {
                status_message: "Idle".to_string(),
                ..Inner::default()
            }),
        };
        Ok(Self { core: Arc::new(core) })
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &StreamConfig {
        &self.core.config
    }

    /// Start streaming `contracts`, replacing any running session.
    ///
    /// Returns as soon as the session workers are launched; progress and failures are
    /// reported through the status. `false` only when there is nothing to subscribe.
    pub fn start(&self, contracts: &[ContractKey]) -> bool {
        self.core.start(contracts)
    }

    /// Stop the running session. `false` when nothing was running.
    pub fn stop(&self) -> bool {
        self.core.stop()
    }

    #[allow(missing_docs)]
    pub fn get_status(&self) -> StreamStatus {
        self.core.status()
    }

    /// Copy of every quote record.
    pub fn get_latest_data(&self) -> HashMap<QuoteKey, QuoteRecord> {
        self.core.store.snapshot()
    }

    /// Occurrences of every field id the catalog could not map.
    pub fn unmapped_field_ids(&self) -> HashMap<String, u64> {
        self.core.stats.unmapped_ids()
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        self.core.stop();
    }
}

impl Core {
    fn start(self: &Arc<Self>, contracts: &[ContractKey]) -> bool {
        let mut seen = HashSet::with_capacity(contracts.len());
        let keys: Vec<ContractKey> = contracts
            .iter()
            .filter(|key| seen.insert(*key))
            .cloned()
            .collect();
        if keys.is_empty() {
            warn!("start called without contracts");
            let mut inner = self.inner.lock();
            inner.error_message = Some("No contracts to stream".to_string());
            inner.status_message = "Nothing to subscribe".to_string();
            return false;
        }

        let mut inner = loop {
            let mut inner = self.inner.lock();
            match inner.session.take() {
                None => break inner,
                Some(session) => {
                    info!("Stopping the running session before starting a new one");
                    inner.generation += 1;
                    inner.state = SessionState::Stopping;
                    drop(inner);
                    self.teardown(session);
                }
            }
        };

        inner.reconnect_attempts = 0;
        inner.error_message = None;
        inner.subscribed_count = 0;
        inner.subscriptions.clear();
        inner.requested.clear();
        inner.state = SessionState::Starting;
        inner.status_message = format!("Starting stream for {} contracts", keys.len());
        self.store.clear();
        self.liveness.reset();
        self.stats.reset();
        info!("Starting stream for {} contracts", keys.len());

        self.begin_session(&mut inner, keys, Launch::Initial, None);
        true
    }

    fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.is_running() && inner.session.is_none() {
            debug!("stop called while {}; nothing to do", inner.state);
            return false;
        }
        inner.generation += 1;
        let generation = inner.generation;
        inner.state = SessionState::Stopping;
        inner.status_message = "Stopping stream".to_string();
        let session = inner.session.take();
        drop(inner);

        if let Some(session) = session {
            self.teardown(session);
        }

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.subscriptions.clear();
            inner.requested.clear();
            inner.subscribed_count = 0;
            inner.state = SessionState::Stopped;
            inner.status_message = "Streaming stopped".to_string();
        }
        info!("Streaming stopped");
        true
    }

    fn status(&self) -> StreamStatus {
        let inner = self.inner.lock();
        StreamStatus {
            state: inner.state,
            is_running: inner.state.is_running(),
            status_message: inner.status_message.clone(),
            error_message: inner.error_message.clone(),
            subscribed_count: inner.subscribed_count,
            quote_count: self.store.count(),
            messages_processed: self.stats.messages_processed(),
            unmapped_fields: self.stats.unmapped_fields(),
            reconnect_attempts: inner.reconnect_attempts,
            last_data_update: self.store.last_update_time(),
            last_heartbeat: self.liveness.last_heartbeat_at(),
        }
    }

    fn thresholds(&self) -> LivenessThresholds {
        LivenessThresholds {
            heartbeat_timeout: self.config.heartbeat_timeout(),
            data_staleness: self.config.data_staleness(),
        }
    }

    /// Launch the workers of a new session. Caller holds the lock and has already
    /// torn down the previous session.
    fn begin_session(
        self: &Arc<Self>,
        inner: &mut Inner,
        keys: Vec<ContractKey>,
        launch: Launch,
        delay: Option<Duration>,
    ) {
        inner.generation += 1;
        let generation = inner.generation;
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let mut workers = Vec::with_capacity(3);
        match self.spawn_workers(generation, keys, launch, delay, shutdown_rx, &mut workers) {
            Ok(()) => {
                debug!("Session {generation} launched ({launch})");
                inner.session = Some(Session {
                    generation,
                    shutdown_tx,
                    handle: None,
                    workers,
                });
            }
            Err(e) => {
                error!("Could not launch session workers: {e}");
                drop(shutdown_tx);
                inner.generation += 1;
                inner.state = SessionState::Failed;
                inner.error_message = Some(format!("Could not launch session workers: {e}"));
                inner.status_message = "Streaming failed to start".to_string();
            }
        }
    }

    fn spawn_workers(
        self: &Arc<Self>,
        generation: u64,
        keys: Vec<ContractKey>,
        launch: Launch,
        delay: Option<Duration>,
        shutdown_rx: Receiver<()>,
        workers: &mut Vec<Worker>,
    ) -> Result<()> {
        let events: Arc<dyn SessionEvents> = Arc::new(SessionListener {
            core: Arc::downgrade(self),
            generation,
        });
        let (dispatch_handle, mut dispatcher) = dispatcher::channel(
            Arc::clone(&self.catalog),
            Arc::clone(&self.store),
            Arc::clone(&self.liveness),
            Arc::clone(&self.stats),
            events,
        );
        if let Some(path) = &self.config.frame_log {
            match FrameJournal::open(path) {
                Ok(journal) => dispatcher = dispatcher.with_journal(journal),
                Err(e) => warn!("Frame journal {} unavailable: {e}", path.display()),
            }
        }

        let poll = self.config.dispatcher_poll();
        let dispatch_shutdown = shutdown_rx.clone();
        spawn_worker("option-dispatch", workers, move || {
            dispatcher.run(dispatch_shutdown, poll)
        })?;

        let core = Arc::clone(self);
        let interval = self.config.monitor_interval();
        let monitor_shutdown = shutdown_rx.clone();
        spawn_worker("option-monitor", workers, move || {
            run_monitor(interval, &monitor_shutdown, || core.monitor_tick(generation))
        })?;

        let core = Arc::clone(self);
        spawn_worker("option-start", workers, move || {
            core.run_start(generation, keys, dispatch_handle, launch, delay, shutdown_rx)
        })?;
        Ok(())
    }

    fn run_start(
        self: &Arc<Self>,
        generation: u64,
        keys: Vec<ContractKey>,
        dispatch: DispatcherHandle,
        launch: Launch,
        delay: Option<Duration>,
        shutdown_rx: Receiver<()>,
    ) {
        if let Some(delay) = delay {
            select! {
                recv(shutdown_rx) -> _ => {
                    debug!("Session {generation} cancelled before connecting");
                    return;
                }
                recv(after(delay)) -> _ => {}
            }
        }
        if !self.is_current(generation) {
            return;
        }

        info!("Connecting streaming transport ({launch})");
        let mut handle = match self.transport.connect() {
            Ok(handle) => handle,
            Err(e) => {
                self.setup_failed(generation, launch, format!("Transport connect failed: {e}"));
                return;
            }
        };
        handle.on_message(dispatch.callback());

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                drop(inner);
                self.close_handle(handle);
                return;
            }
            inner.state = SessionState::Subscribing;
            inner.requested = keys.clone();
            inner.status_message = format!("Subscribing to {} contracts", keys.len());
        }

        let wire_keys: Vec<String> = keys.iter().map(ContractKey::encode_wire).collect();
        let fields = self.catalog.subscription_fields();
        if let Err(e) = handle.subscribe(&wire_keys, fields, SubscribeMode::Add) {
            self.close_handle(handle);
            self.setup_failed(generation, launch, format!("Subscribe failed: {e}"));
            return;
        }
        debug!("Subscribe sent for {} keys, {} fields", wire_keys.len(), fields.len());

        let mut inner = self.inner.lock();
        let current = inner.generation == generation
            && inner.session.as_ref().is_some_and(|s| s.generation == generation);
        if !current {
            drop(inner);
            self.close_handle(handle);
            return;
        }
        log_subscription_change(&inner.subscriptions, &keys);
        inner.status_message = format!("Streaming {} contracts", keys.len());
        inner.subscriptions = keys;
        inner.state = SessionState::Streaming;
        if let Some(session) = inner.session.as_mut() {
            session.handle = Some(handle);
        }
        self.liveness.begin_session();
        info!("Streaming session {generation} is live");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    fn setup_failed(self: &Arc<Self>, generation: u64, launch: Launch, message: String) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!("Ignoring setup failure of superseded session {generation}: {message}");
            return;
        }
        error!("{message}");
        inner.error_message = Some(message.clone());
        match launch {
            Launch::Initial => {
                inner.generation += 1;
                inner.state = SessionState::Failed;
                inner.status_message = "Streaming failed to start".to_string();
                let session = inner.session.take();
                drop(inner);
                if let Some(session) = session {
                    self.teardown(session);
                }
            }
            Launch::Reconnect => self.schedule_reconnect(inner, message),
        }
    }

    /// One liveness check; `false` ends the monitor loop.
    fn monitor_tick(self: &Arc<Self>, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        if inner.state != SessionState::Streaming {
            return true;
        }
        if inner.reconnect_attempts > 0 && self.liveness.has_session_traffic() {
            info!(
                "Session recovered after {} reconnect attempts",
                inner.reconnect_attempts
            );
            inner.reconnect_attempts = 0;
        }

        let has_subscriptions = !inner.subscriptions.is_empty();
        match self.liveness.check(&self.thresholds(), has_subscriptions) {
            None => true,
            Some(reason) => {
                warn!("Streaming session {generation} is stale: {reason}");
                self.schedule_reconnect(inner, reason.to_string());
                false
            }
        }
    }

    /// Tear the session down and launch the next attempt, or fail when the budget is
    /// spent. Takes the held guard and releases it around the teardown.
    fn schedule_reconnect(self: &Arc<Self>, mut inner: MutexGuard<'_, Inner>, reason: String) {
        let attempt = inner.reconnect_attempts;
        inner.subscribed_count = 0;
        inner.generation += 1;
        let generation = inner.generation;

        let Some(delay) = self.strategy.next_delay(attempt) else {
            error!("Giving up after {attempt} reconnect attempts: {reason}");
            inner.state = SessionState::Failed;
            inner.error_message = Some(format!(
                "Reconnect attempts exhausted after {attempt} tries: {reason}"
            ));
            inner.status_message = "Streaming failed".to_string();
            let session = inner.session.take();
            drop(inner);
            if let Some(session) = session {
                self.teardown(session);
            }
            return;
        };

        inner.reconnect_attempts = attempt + 1;
        inner.state = SessionState::Reconnecting;
        inner.status_message = format!(
            "Reconnecting (attempt {}) in {}ms: {reason}",
            attempt + 1,
            delay.as_millis()
        );
        warn!("{}", inner.status_message);
        let session = inner.session.take();
        drop(inner);
        if let Some(session) = session {
            self.teardown(session);
        }

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != SessionState::Reconnecting {
            debug!("Reconnect superseded while tearing down");
            return;
        }
        let keys = if inner.subscriptions.is_empty() {
            inner.requested.clone()
        } else {
            inner.subscriptions.clone()
        };
        self.begin_session(&mut inner, keys, Launch::Reconnect, Some(delay));
    }

    /// Signal the workers, close the transport and join. Must run without the lock.
    fn teardown(&self, session: Session) {
        let Session {
            generation,
            shutdown_tx,
            handle,
            workers,
        } = session;
        drop(shutdown_tx);
        if let Some(handle) = handle {
            self.close_handle(handle);
        }
        let current = thread::current().id();
        let deadline = Instant::now() + self.config.teardown_timeout();
        for worker in workers {
            if worker.handle.thread().id() == current {
                continue;
            }
            match worker.done.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => warn!(
                    "Worker {} of session {generation} still busy after {}ms, detaching it",
                    worker.name,
                    self.config.teardown_timeout().as_millis()
                ),
                _ => {
                    if worker.handle.join().is_err() {
                        error!("Worker {} of session {generation} panicked", worker.name);
                    }
                }
            }
        }
        debug!("Session {generation} torn down");
    }

    /// Close on a helper thread, waiting at most `teardown_timeout`.
    fn close_handle(&self, mut handle: Box<dyn TransportHandle>) {
        let (done_tx, done_rx) = bounded::<Result<()>>(1);
        let spawned = thread::Builder::new()
            .name("option-close".to_string())
            .spawn(move || {
                let _ = done_tx.send(handle.close());
            });
        if let Err(e) = spawned {
            error!("Could not spawn transport close thread: {e}");
            return;
        }
        let timeout = self.config.teardown_timeout();
        match done_rx.recv_timeout(timeout) {
            Ok(Ok(())) => debug!("Transport closed"),
            Ok(Err(e)) => warn!("Transport close failed: {e}"),
            Err(_) => warn!(
                "Transport close still pending after {}ms, abandoning it",
                timeout.as_millis()
            ),
        }
    }
}

fn spawn_worker<F>(name: &'static str, workers: &mut Vec<Worker>, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done) = bounded::<()>(0);
    let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
        let _done = done_tx;
        f()
    })?;
    workers.push(Worker { name, handle, done });
    Ok(())
}

fn log_subscription_change(previous: &[ContractKey], next: &[ContractKey]) {
    let before: HashSet<&ContractKey> = previous.iter().collect();
    let now: HashSet<&ContractKey> = next.iter().collect();
    let added = now.difference(&before).count();
    let removed = before.difference(&now).count();
    info!(
        "Subscription set now {} contracts ({added} added, {removed} removed)",
        next.len()
    );
}

/// Reactions of one session's dispatcher, bound to that session's generation.
struct SessionListener {
    core: Weak<Core>,
    generation: u64,
}

impl SessionEvents for SessionListener {
    fn subscription_ack(&self, success: bool, message: &str) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let mut inner = core.inner.lock();
        if inner.generation != self.generation {
            debug!("Ignoring subscription reply of superseded session: {message}");
            return;
        }
        if success {
            inner.subscribed_count = inner.requested.len();
            inner.status_message = format!("Subscribed to {} contracts", inner.subscribed_count);
            info!("{}", inner.status_message);
        } else {
            error!("Subscription rejected: {message}");
            inner.error_message = Some(format!("Subscription rejected: {message}"));
            inner.status_message = "Subscription rejected".to_string();
        }
    }

    fn frame_error(&self, error: &StreamError) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let mut inner = core.inner.lock();
        if inner.generation == self.generation {
            inner.error_message = Some(format!("Failed to process message: {error}"));
        }
    }
}
