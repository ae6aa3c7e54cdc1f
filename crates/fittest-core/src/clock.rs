//! Time sources
//!
//! Everything that compares timestamps goes through a [`Clock`] so tests can
//! drive time by hand. [`Ticker`] is the shared periodic tick that advances
//! protocol execution.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Default period of the shared tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Source of "now"
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at the given instant
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }
}

/// Periodic tick stamped with the clock's time.
///
/// Every listener served from one [`Ticker::tick`] sees the same timestamp.
pub struct Ticker {
    interval: Interval,
    clock: Arc<dyn Clock>,
}

impl Ticker {
    /// Tick every `period`. The first tick completes immediately.
    pub fn new(period: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, clock }
    }

    /// Wait for the next tick and return its timestamp
    pub async fn tick(&mut self) -> DateTime<Utc> {
        self.interval.tick().await;
        self.clock.now()
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

/// Milliseconds from `earlier` to `later`, zero if `later` is not after it
pub(crate) fn elapsed_ms(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    u64::try_from((later - earlier).num_milliseconds()).unwrap_or(0)
}
