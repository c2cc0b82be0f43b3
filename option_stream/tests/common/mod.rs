//! Common test utilities for the streaming integration tests.
//!
//! `ScriptedTransport` stands in for the vendor session: tests decide whether connect,
//! subscribe or close misbehave, and inject inbound frames with `push`.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use option_common::contract::{ContractKey, OptionType};
use option_common::{Result, StreamError};
use option_stream::{MessageCallback, StreamConfig, SubscribeMode, Transport, TransportHandle};
use parking_lot::Mutex;

#[derive(Default)]
struct Script {
    fail_connect: bool,
    fail_subscribe: bool,
    hang_connect: Option<Duration>,
    hang_subscribe: Option<Duration>,
    hang_close: Option<Duration>,
    connects: usize,
    closes: usize,
    subscriptions: Vec<(Vec<String>, Vec<u16>, SubscribeMode)>,
    /// Callback of the most recently connected session.
    live: Option<(usize, MessageCallback)>,
}

/// Mock transport whose behaviour is scripted by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_connect(&self, fail: bool) {
        self.script.lock().fail_connect = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.script.lock().fail_subscribe = fail;
    }

    /// Make every following connect sleep for `duration`; `None` restores normal connects.
    pub fn hang_connect(&self, duration: Option<Duration>) {
        self.script.lock().hang_connect = duration;
    }

    pub fn hang_subscribe(&self, duration: Option<Duration>) {
        self.script.lock().hang_subscribe = duration;
    }

    pub fn hang_close(&self, duration: Duration) {
        self.script.lock().hang_close = Some(duration);
    }

    /// Connect attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.script.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.script.lock().closes
    }

    pub fn subscriptions(&self) -> Vec<(Vec<String>, Vec<u16>, SubscribeMode)> {
        self.script.lock().subscriptions.clone()
    }

    /// Deliver `raw` through the live session's callback. `false` without a live session.
    pub fn push(&self, raw: &str) -> bool {
        let callback = self.script.lock().live.as_ref().map(|(_, cb)| Arc::clone(cb));
        match callback {
            Some(callback) => {
                callback(raw.to_string());
                true
            }
            None => false,
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self) -> Result<Box<dyn TransportHandle>> {
        let hang = {
            let mut script = self.script.lock();
            script.connects += 1;
            script.hang_connect
        };
        if let Some(duration) = hang {
            thread::sleep(duration);
        }
        let script = self.script.lock();
        if script.fail_connect {
            return Err(StreamError::Transport("scripted connect failure".to_string()));
        }
        Ok(Box::new(ScriptedHandle {
            id: script.connects,
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedHandle {
    id: usize,
    script: Arc<Mutex<Script>>,
}

impl TransportHandle for ScriptedHandle {
    fn on_message(&mut self, callback: MessageCallback) {
        self.script.lock().live = Some((self.id, callback));
    }

    fn subscribe(&mut self, keys: &[String], fields: &[u16], mode: SubscribeMode) -> Result<()> {
        let hang = self.script.lock().hang_subscribe;
        if let Some(duration) = hang {
            thread::sleep(duration);
        }
        let mut script = self.script.lock();
        if script.fail_subscribe {
            return Err(StreamError::Subscribe("scripted subscribe failure".to_string()));
        }
        script.subscriptions.push((keys.to_vec(), fields.to_vec(), mode));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let hang = {
            let mut script = self.script.lock();
            script.closes += 1;
            if script.live.as_ref().is_some_and(|(id, _)| *id == self.id) {
                script.live = None;
            }
            script.hang_close
        };
        if let Some(duration) = hang {
            thread::sleep(duration);
        }
        Ok(())
    }
}

/// Timings short enough for tests; no liveness failure within a few seconds.
pub fn quiet_config() -> StreamConfig {
    StreamConfig {
        heartbeat_interval_ms: 10_000,
        monitor_interval_ms: 10,
        data_staleness_ms: 60_000,
        reconnect_delay_ms: 10,
        dispatcher_poll_ms: 10,
        teardown_timeout_ms: 200,
        ..StreamConfig::default()
    }
}

/// Timings where a silent session goes stale after `2 * heartbeat_ms`.
pub fn stale_config(heartbeat_ms: u64, max_reconnect_attempts: u32) -> StreamConfig {
    StreamConfig {
        heartbeat_interval_ms: heartbeat_ms,
        max_reconnect_attempts,
        ..quiet_config()
    }
}

pub fn contract(symbol: &str, option_type: OptionType, strike: f64) -> ContractKey {
    ContractKey::new(symbol, "240621", option_type, strike).unwrap()
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(5);
