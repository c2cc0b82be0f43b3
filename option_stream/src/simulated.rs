//! Simulated vendor feed.
//!
//! A [`Transport`] that needs no network: every session acknowledges its subscribe
//! request and then streams synthetic quotes for the subscribed contracts plus periodic
//! heartbeats, as JSON frames through the registered callback.
//!
//! Prices follow a small random walk around a per-contract starting mark. The first
//! update of every contract also carries its strike and contract type, the way the
//! vendor sends static fields once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Sender, bounded, select, tick};
use log::{debug, info, warn};
use option_common::contract::{ContractKey, OptionType};
use option_common::frame::{DataGroup, StreamFrame};
use option_common::{Result, StreamError};
use rand::Rng;
use serde_json::{Value, json};

use crate::transport::{MessageCallback, SubscribeMode, Transport, TransportHandle};

/// Pacing and failure injection for [`SimulatedFeed`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Interval between data frames.
    pub tick: Duration,
    /// Interval between heartbeat frames.
    pub heartbeat_interval: Duration,
    /// Refuse every connect.
    pub fail_connect: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(5),
            fail_connect: false,
        }
    }
}

/// Synthetic market data source.
pub struct SimulatedFeed {
    config: SimulatedConfig,
    connects: AtomicU64,
}

impl SimulatedFeed {
    #[allow(missing_docs)]
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            connects: AtomicU64::new(0),
        }
    }

    /// Sessions opened so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

impl Transport for SimulatedFeed {
    fn connect(&self) -> Result<Box<dyn TransportHandle>> {
        if self.config.fail_connect {
            return Err(StreamError::Transport("simulated feed refused the connection".to_string()));
        }
        let session = self.connects.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Simulated feed session {session} opened");
        Ok(Box::new(SimulatedSession {
            config: self.config.clone(),
            callback: None,
            generator: None,
        }))
    }
}

struct SimulatedSession {
    config: SimulatedConfig,
    callback: Option<MessageCallback>,
    generator: Option<(Sender<()>, JoinHandle<()>)>,
}

impl TransportHandle for SimulatedSession {
    fn on_message(&mut self, callback: MessageCallback) {
        self.callback = Some(callback);
    }

    fn subscribe(&mut self, keys: &[String], fields: &[u16], mode: SubscribeMode) -> Result<()> {
        let callback = self
            .callback
            .clone()
            .ok_or_else(|| StreamError::Subscribe("no message callback registered".to_string()))?;

        let mut contracts = Vec::with_capacity(keys.len());
        for raw in keys {
            match raw.parse::<ContractKey>() {
                Ok(key) => contracts.push(SimulatedContract::new(raw, key)),
                Err(_) => warn!("Simulated feed ignores key {raw:?}"),
            }
        }
        debug!("Simulated {mode} for {} keys, {} fields", contracts.len(), fields.len());

        let reply = StreamFrame::command_reply(
            &mode.to_string(),
            0,
            &format!("{mode} command succeeded"),
        );
        callback(reply.to_json()?);

        self.stop_generator();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let data_tick = tick(self.config.tick);
        let heartbeat_tick = tick(self.config.heartbeat_interval);
        let handle = thread::Builder::new()
            .name("simulated-feed".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(heartbeat_tick) -> _ => {
                            if let Ok(frame) = StreamFrame::heartbeat(Utc::now().timestamp_millis()).to_json() {
                                callback(frame);
                            }
                        }
                        recv(data_tick) -> _ => if !contracts.is_empty() {
                            let groups = contracts.iter_mut().map(SimulatedContract::next_group).collect();
                            match StreamFrame::data(Utc::now().timestamp_millis(), groups).to_json() {
                                Ok(frame) => callback(frame),
                                Err(e) => warn!("Failed to encode simulated frame: {e}"),
                            }
                        },
                    }
                }
                debug!("Simulated feed generator exiting");
            })?;
        self.generator = Some((stop_tx, handle));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop_generator();
        self.callback = None;
        Ok(())
    }
}

impl SimulatedSession {
    fn stop_generator(&mut self) {
        if let Some((stop_tx, handle)) = self.generator.take() {
            drop(stop_tx);
            if handle.join().is_err() {
                warn!("Simulated feed generator panicked");
            }
        }
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

/// Random-walk state of one contract.
struct SimulatedContract {
    wire_key: String,
    key: ContractKey,
    mark: f64,
    volume: u64,
    open_interest: u64,
    volatility: f64,
    sent_static: bool,
}

impl SimulatedContract {
    fn new(wire_key: &str, key: ContractKey) -> Self {
        let mut rng = rand::rng();
        let mark = (key.strike() * rng.random_range(0.01..0.05)).max(0.05);
        Self {
            wire_key: wire_key.to_string(),
            key,
            mark,
            volume: 0,
            open_interest: rng.random_range(100..5_000),
            volatility: rng.random_range(15.0..60.0),
            sent_static: false,
        }
    }

    fn next_group(&mut self) -> DataGroup {
        let mut rng = rand::rng();
        let previous = self.mark;
        self.mark = next_price(self.mark);
        let spread = (self.mark * 0.02).max(0.01);
        self.volume += rng.random_range(0..50);
        self.volatility = (self.volatility * (1.0 + rng.random_range(-0.005..0.005))).max(1.0);

        let delta = match self.key.option_type() {
            OptionType::Call => rng.random_range(0.05..0.95),
            OptionType::Put => -rng.random_range(0.05..0.95),
        };

        let mut fields: Vec<(&str, Value)> = vec![
            ("2", json!(round2(self.mark - spread / 2.0))),
            ("3", json!(round2(self.mark + spread / 2.0))),
            ("4", json!(round2(self.mark))),
            ("8", json!(self.volume)),
            ("9", json!(self.open_interest)),
            ("10", json!(round2(self.volatility))),
            ("19", json!(round2(self.mark - previous))),
            ("28", json!(round2(delta))),
            ("29", json!(round2(rng.random_range(0.0..0.1)))),
            ("30", json!(round2(-rng.random_range(0.0..0.5)))),
            ("31", json!(round2(rng.random_range(0.0..0.3)))),
            ("37", json!(round2(self.mark))),
        ];
        if !self.sent_static {
            fields.push(("20", json!(self.key.strike())));
            fields.push(("21", json!(self.key.option_type().code().to_string())));
            self.sent_static = true;
        }
        DataGroup::new(&self.wire_key, fields)
    }
}

/// Next price of a random walk: a uniform step in `[-1%, +1%)`, kept at or above `0.01`.
fn next_price(current: f64) -> f64 {
    let change: f64 = rand::rng().random_range(-0.01..0.01);
    (current * (1.0 + change)).max(0.01)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
