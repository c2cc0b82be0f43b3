//! Streaming configuration.
//!
//! Every setting has a default, so a JSON config file only needs the keys it changes:
//!
//! ```json
//! { "heartbeat_interval_ms": 5000, "max_reconnect_attempts": 3, "backoff": "exponential" }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use option_common::StreamError;
use option_common::fields::{FieldCatalog, SUBSCRIPTION_FIELDS};
use option_common::Result;
use serde::{Deserialize, Serialize};

use crate::reconnect::{BackoffKind, ExponentialBackoff, FixedDelay, ReconnectionStrategy};

/// Timings, limits and field selection for one `StreamingManager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Expected interval between transport heartbeats; stale after twice this.
    pub heartbeat_interval_ms: u64,
    /// How often the liveness monitor checks the session.
    pub monitor_interval_ms: u64,
    /// Maximum silence on data while subscribed before the session is stale.
    pub data_staleness_ms: u64,
    /// Reconnects attempted before the session fails.
    pub max_reconnect_attempts: u32,
    /// Delay before a reconnect (first delay for exponential backoff).
    pub reconnect_delay_ms: u64,
    /// Delay schedule.
    pub backoff: BackoffKind,
    /// Cap for exponential backoff.
    pub max_reconnect_delay_ms: u64,
    /// Idle wake-up interval of the dispatcher loop.
    pub dispatcher_poll_ms: u64,
    /// Longest `stop` waits for the transport to close.
    pub teardown_timeout_ms: u64,
    /// Field ids requested in the subscribe call.
    pub subscription_fields: Vec<u16>,
    /// Append every raw frame to this JSON-lines file.
    pub frame_log: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            monitor_interval_ms: 10_000,
            data_staleness_ms: 60_000,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 5_000,
            backoff: BackoffKind::Fixed,
            max_reconnect_delay_ms: 60_000,
            dispatcher_poll_ms: 500,
            teardown_timeout_ms: 5_000,
            subscription_fields: SUBSCRIPTION_FIELDS.to_vec(),
            frame_log: None,
        }
    }
}

impl StreamConfig {
    /// Load from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("data_staleness_ms", self.data_staleness_ms),
            ("dispatcher_poll_ms", self.dispatcher_poll_ms),
            ("teardown_timeout_ms", self.teardown_timeout_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(StreamError::Config(format!("{name} must be greater than zero")));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(StreamError::Config(
                "max_reconnect_delay_ms is below reconnect_delay_ms".to_string(),
            ));
        }
        if self.subscription_fields.is_empty() {
            return Err(StreamError::Config("subscription_fields is empty".to_string()));
        }
        self.field_catalog().map(|_| ())
    }

    /// Unified field catalog for the configured subscription list.
    pub fn field_catalog(&self) -> Result<FieldCatalog> {
        FieldCatalog::new(&self.subscription_fields)
    }

    /// Reconnect delay policy.
    pub fn reconnect_strategy(&self) -> Box<dyn ReconnectionStrategy> {
        let max_attempts = Some(self.max_reconnect_attempts);
        match self.backoff {
            BackoffKind::Fixed => Box::new(FixedDelay::new(self.reconnect_delay(), max_attempts)),
            BackoffKind::Exponential => Box::new(ExponentialBackoff::new(
                self.reconnect_delay(),
                Duration::from_millis(self.max_reconnect_delay_ms),
                max_attempts,
            )),
        }
    }

    #[allow(missing_docs)]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat silence after which the session is stale.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * 2
    }

    #[allow(missing_docs)]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    #[allow(missing_docs)]
    pub fn data_staleness(&self) -> Duration {
        Duration::from_millis(self.data_staleness_ms)
    }

    #[allow(missing_docs)]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[allow(missing_docs)]
    pub fn dispatcher_poll(&self) -> Duration {
        Duration::from_millis(self.dispatcher_poll_ms)
    }

    #[allow(missing_docs)]
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}
