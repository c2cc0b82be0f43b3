//! Heartbeat/data liveness tracking and the periodic monitor loop.
//!
//! `LivenessTracker` records when the last heartbeat (or other admin traffic) and the
//! last data frame arrived. It is written by the dispatcher thread and read by the
//! monitor and status callers, so it uses atomics only:
//!
//! - `record_heartbeat()` / `record_data()`: stamp fresh traffic.
//! - `begin_session()`: restart the staleness clocks for a new transport session.
//! - `check(...)`: report why the session is stale, if it is.
//!
//! Design notes:
//! - Elapsed times use `Instant` (monotonic) relative to an internal epoch, stored as
//!   milliseconds + 1 so that `0` can mean "never".
//! - Wall-clock times for status output are kept separately as epoch milliseconds.
//! - Before any traffic arrives in a session, silence is measured from the session start.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, select, tick};
use log::debug;

const NEVER: u64 = 0;
const NO_WALL_TIME: i64 = i64::MIN;

/// Why a session was declared stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// No heartbeat/admin traffic for longer than the heartbeat timeout.
    Heartbeat(Duration),
    /// No data while subscribed for longer than the data staleness threshold.
    Data(Duration),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Heartbeat(silence) => write!(f, "no heartbeat for {}ms", silence.as_millis()),
            StaleReason::Data(silence) => write!(f, "no data for {}ms", silence.as_millis()),
        }
    }
}

/// Staleness thresholds.
#[derive(Debug, Clone, Copy)]
pub struct LivenessThresholds {
    /// Maximum heartbeat silence (twice the expected heartbeat interval).
    pub heartbeat_timeout: Duration,
    /// Maximum data silence while subscribed.
    pub data_staleness: Duration,
}

/// Lock-free record of the latest heartbeat and data traffic.
pub struct LivenessTracker {
    epoch: Instant,
    session_start_ms: AtomicU64,
    last_heartbeat_ms: AtomicU64,
    last_data_ms: AtomicU64,
    last_heartbeat_wall_ms: AtomicI64,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessTracker {
    /// Create a tracker whose session starts now.
    pub fn new() -> Self {
        let tracker = Self {
            epoch: Instant::now(),
            session_start_ms: AtomicU64::new(NEVER),
            last_heartbeat_ms: AtomicU64::new(NEVER),
            last_data_ms: AtomicU64::new(NEVER),
            last_heartbeat_wall_ms: AtomicI64::new(NO_WALL_TIME),
        };
        tracker.begin_session();
        tracker
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Forget all traffic; used when a caller starts a fresh session.
    pub fn reset(&self) {
        self.last_heartbeat_ms.store(NEVER, Ordering::Release);
        self.last_data_ms.store(NEVER, Ordering::Release);
        self.last_heartbeat_wall_ms.store(NO_WALL_TIME, Ordering::Release);
        self.begin_session();
    }

    /// Restart the staleness clocks for a new transport session.
    pub fn begin_session(&self) {
        self.session_start_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Record a heartbeat or other admin message.
    pub fn record_heartbeat(&self) {
        self.last_heartbeat_ms.store(self.now_ms(), Ordering::Release);
        self.last_heartbeat_wall_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Record a data message that reached the store.
    pub fn record_data(&self) {
        self.last_data_ms.store(self.now_ms(), Ordering::Release);
    }

    fn silence(&self, last: &AtomicU64) -> Duration {
        let start = self.session_start_ms.load(Ordering::Acquire);
        let since = last.load(Ordering::Acquire).max(start);
        Duration::from_millis(self.now_ms().saturating_sub(since))
    }

    /// Time since the last heartbeat, or since the session started if none yet.
    pub fn heartbeat_silence(&self) -> Duration {
        self.silence(&self.last_heartbeat_ms)
    }

    /// Time since the last data message, or since the session started if none yet.
    pub fn data_silence(&self) -> Duration {
        self.silence(&self.last_data_ms)
    }

    /// Whether any heartbeat or data arrived since the current session started.
    pub fn has_session_traffic(&self) -> bool {
        let start = self.session_start_ms.load(Ordering::Acquire);
        let heartbeat = self.last_heartbeat_ms.load(Ordering::Acquire);
        let data = self.last_data_ms.load(Ordering::Acquire);
        heartbeat.max(data) >= start
    }

    /// Wall-clock time of the last heartbeat.
    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        match self.last_heartbeat_wall_ms.load(Ordering::Acquire) {
            NO_WALL_TIME => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Stale reason, if the session exceeded a threshold.
    ///
    /// Data silence only counts while at least one subscription exists.
    pub fn check(&self, thresholds: &LivenessThresholds, has_subscriptions: bool) -> Option<StaleReason> {
        let heartbeat = self.heartbeat_silence();
        if heartbeat > thresholds.heartbeat_timeout {
            return Some(StaleReason::Heartbeat(heartbeat));
        }
        let data = self.data_silence();
        if has_subscriptions && data > thresholds.data_staleness {
            return Some(StaleReason::Data(data));
        }
        None
    }
}

/// Run `check` every `interval` until the shutdown channel closes or `check` returns
/// `false`.
pub fn run_monitor<F>(interval: Duration, shutdown_rx: &Receiver<()>, mut check: F)
where
    F: FnMut() -> bool,
{
    let ticker = tick(interval);
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(ticker) -> _ => {
                if !check() {
                    break;
                }
            }
        }
    }
    debug!("Liveness monitor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::thread::sleep;

    fn thresholds(ms: u64) -> LivenessThresholds {
        LivenessThresholds {
            heartbeat_timeout: Duration::from_millis(ms),
            data_staleness: Duration::from_millis(ms),
        }
    }

    #[test]
    fn fresh_session_is_healthy() {
        let tracker = LivenessTracker::new();
        assert_eq!(tracker.check(&thresholds(1_000), true), None);
        assert!(!tracker.has_session_traffic());
        assert!(tracker.last_heartbeat_at().is_none());
    }

    #[test]
    fn heartbeat_silence_goes_stale() {
        let tracker = LivenessTracker::new();
        sleep(Duration::from_millis(60));
        assert!(matches!(
            tracker.check(&thresholds(50), false),
            Some(StaleReason::Heartbeat(_))
        ));
    }

    #[test]
    fn data_silence_only_counts_with_subscriptions() {
        let tracker = LivenessTracker::new();
        let limits = LivenessThresholds {
            heartbeat_timeout: Duration::from_secs(10),
            data_staleness: Duration::from_millis(30),
        };
        sleep(Duration::from_millis(50));
        tracker.record_heartbeat();
        assert_eq!(tracker.check(&limits, false), None);
        assert!(matches!(tracker.check(&limits, true), Some(StaleReason::Data(_))));

        tracker.record_data();
        assert_eq!(tracker.check(&limits, true), None);
        assert!(tracker.has_session_traffic());
        assert!(tracker.last_heartbeat_at().is_some());
    }

    #[test]
    fn begin_session_restarts_the_clock() {
        let tracker = LivenessTracker::new();
        tracker.record_heartbeat();
        sleep(Duration::from_millis(60));
        assert!(tracker.check(&thresholds(50), false).is_some());
        tracker.begin_session();
        assert_eq!(tracker.check(&thresholds(50), false), None);
        assert!(!tracker.has_session_traffic());
    }

    #[test]
    fn monitor_exits_when_shutdown_closes() {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let handle = std::thread::spawn(move || {
            let mut ticks = 0;
            run_monitor(Duration::from_millis(5), &shutdown_rx, || {
                ticks += 1;
                true
            });
            ticks
        });
        sleep(Duration::from_millis(40));
        drop(shutdown_tx);
        assert!(handle.join().unwrap() > 0);
    }
}
