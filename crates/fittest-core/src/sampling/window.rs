//! Rolling concentration window
//!
//! Keeps the readings of one sample source that are younger than a max-age.
//! A gated window additionally ignores readings while a purge is running and
//! can publish its rolling average to a `watch` channel after every accepted
//! reading.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::instrument::{ConcentrationEvent, SampleSource};

/// Returned by the averaging functions when too few readings qualify
pub const INSUFFICIENT_SAMPLES: f64 = -1.0;

/// Time-bounded buffer of readings for one sample source
pub struct SampleWindow {
    source: SampleSource,
    max_age: Duration,
    events: VecDeque<ConcentrationEvent>,
    gated: bool,
    purge_until: Option<DateTime<Utc>>,
    publisher: Option<watch::Sender<f64>>,
    clock: Arc<dyn Clock>,
}

impl SampleWindow {
    /// Plain window: records every matching reading
    pub fn new(source: SampleSource, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            max_age,
            events: VecDeque::new(),
            gated: false,
            purge_until: None,
            publisher: None,
            clock,
        }
    }

    /// Gated window: drops readings while a purge set by [`reset`](Self::reset) runs
    pub fn gated(source: SampleSource, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            gated: true,
            ..Self::new(source, max_age, clock)
        }
    }

    /// Publish the rolling average to `sender` after each accepted reading
    pub fn with_publisher(mut self, sender: watch::Sender<f64>) -> Self {
        self.publisher = Some(sender);
        self
    }

    /// Receiver for the published average, if this window publishes
    pub fn subscribe_average(&self) -> Option<watch::Receiver<f64>> {
        self.publisher.as_ref().map(|tx| tx.subscribe())
    }

    /// Source this window accepts
    pub fn source(&self) -> SampleSource {
        self.source
    }

    /// Retention limit
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Number of buffered readings
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Buffered readings, oldest first
    pub fn events(&self) -> impl Iterator<Item = &ConcentrationEvent> {
        self.events.iter()
    }

    /// End of the current purge, if one is set
    pub fn purge_until(&self) -> Option<DateTime<Utc>> {
        self.purge_until
    }

    /// True while a purge is running
    pub fn is_purging(&self) -> bool {
        self.purge_until
            .map(|until| self.clock.now() < until)
            .unwrap_or(false)
    }

    /// Add a reading. Returns false when it was ignored (wrong source or purging).
    pub fn record(&mut self, event: ConcentrationEvent) -> bool {
        if event.sample_source() != self.source {
            return false;
        }
        if self.gated && self.is_purging() {
            return false;
        }

        self.events.push_back(event);
        self.prune();

        if let Some(publisher) = &self.publisher {
            publisher.send_replace(self.average(self.max_age, 0));
        }
        true
    }

    /// Drop every reading older than the max-age.
    ///
    /// Trims from the front through the last stale reading, so a late
    /// out-of-order reading cannot keep older ones alive.
    pub fn prune(&mut self) {
        let now = self.clock.now();
        let max_age_ms = duration_ms(self.max_age);
        let last_stale = self
            .events
            .iter()
            .rposition(|e| age_ms(now, e.timestamp()) > max_age_ms);
        if let Some(index) = last_stale {
            self.events.drain(..=index);
        }
    }

    /// Mean concentration of readings no older than `max_age`.
    ///
    /// Returns [`INSUFFICIENT_SAMPLES`] when fewer than `min_samples` qualify.
    /// With `min_samples == 0` and nothing buffered the result is NaN.
    pub fn average(&self, max_age: Duration, min_samples: usize) -> f64 {
        let recent: Vec<f64> = self.recent(max_age).collect();
        if recent.len() < min_samples {
            return INSUFFICIENT_SAMPLES;
        }
        mean(&recent)
    }

    /// Mean of readings strictly younger than `span`, for closing a sample
    /// segment of that length.
    ///
    /// A reading stamped exactly `span` ago arrived on the tick that opened
    /// the segment and belongs to the one before it.
    pub fn segment_average(&self, span: Duration, min_samples: usize) -> f64 {
        let now = self.clock.now();
        let span_ms = duration_ms(span);
        let inside: Vec<f64> = self
            .events
            .iter()
            .filter(|e| age_ms(now, e.timestamp()) < span_ms)
            .map(|e| e.concentration())
            .collect();
        if inside.len() < min_samples {
            return INSUFFICIENT_SAMPLES;
        }
        mean(&inside)
    }

    /// Mean of qualifying readings after discarding the first `skip` of them.
    ///
    /// Returns [`INSUFFICIENT_SAMPLES`] when fewer than `skip` remain after
    /// the discard.
    pub fn average_skipping_leading(&self, max_age: Duration, skip: usize) -> f64 {
        let remaining: Vec<f64> = self.recent(max_age).skip(skip).collect();
        if remaining.len() < skip {
            return INSUFFICIENT_SAMPLES;
        }
        mean(&remaining)
    }

    /// Clear the buffer and start a purge lasting `purge`. A zero purge only clears.
    pub fn reset(&mut self, purge: Duration) {
        self.events.clear();
        self.purge_until = if self.gated && !purge.is_zero() {
            let purge = chrono::Duration::from_std(purge).unwrap_or(chrono::Duration::zero());
            Some(self.clock.now() + purge)
        } else {
            None
        };
        if let Some(publisher) = &self.publisher {
            publisher.send_replace(f64::NAN);
        }
        tracing::debug!(source = %self.source, ?purge, "sample window reset");
    }

    fn recent(&self, max_age: Duration) -> impl Iterator<Item = f64> + '_ {
        let now = self.clock.now();
        let max_age_ms = duration_ms(max_age);
        self.events
            .iter()
            .filter(move |e| age_ms(now, e.timestamp()) <= max_age_ms)
            .map(|e| e.concentration())
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn age_ms(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> i64 {
    (now - timestamp).num_milliseconds()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::instrument::ControlSource;

    fn reading(clock: &ManualClock, value: f64, source: SampleSource) -> ConcentrationEvent {
        ConcentrationEvent::new(clock.now(), value, source, ControlSource::External)
    }

    #[test]
    fn test_record_ignores_other_source() {
        let clock = ManualClock::default();
        let mut window =
            SampleWindow::new(SampleSource::Mask, Duration::from_secs(60), Arc::new(clock.clone()));

        assert!(!window.record(reading(&clock, 100.0, SampleSource::Ambient)));
        assert!(window.record(reading(&clock, 5.0, SampleSource::Mask)));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_prune_drops_stale_front() {
        let clock = ManualClock::default();
        let mut window = SampleWindow::new(
            SampleSource::Ambient,
            Duration::from_secs(10),
            Arc::new(clock.clone()),
        );

        for value in [1.0, 2.0, 3.0] {
            window.record(reading(&clock, value, SampleSource::Ambient));
            clock.advance(Duration::from_secs(6));
        }
        // now = 18s; readings at 0s and 6s are older than 10s
        window.prune();
        let kept: Vec<f64> = window.events().map(|e| e.concentration()).collect();
        assert_eq!(kept, vec![3.0]);
    }

    #[test]
    fn test_skipping_leading_readings() {
        let clock = ManualClock::default();
        let mut window = SampleWindow::new(
            SampleSource::Ambient,
            Duration::from_secs(60),
            Arc::new(clock.clone()),
        );
        for value in [100.0, 1.0, 2.0, 3.0, 4.0] {
            window.record(reading(&clock, value, SampleSource::Ambient));
        }

        assert_eq!(
            window.average_skipping_leading(Duration::from_secs(60), 1),
            2.5
        );
        assert_eq!(
            window.average_skipping_leading(Duration::from_secs(60), 3),
            INSUFFICIENT_SAMPLES
        );
    }

    #[test]
    fn test_gated_window_publishes_and_purges() {
        let clock = ManualClock::default();
        let (tx, rx) = watch::channel(f64::NAN);
        let mut window =
            SampleWindow::gated(SampleSource::Mask, Duration::from_secs(60), Arc::new(clock.clone()))
                .with_publisher(tx);

        window.record(reading(&clock, 10.0, SampleSource::Mask));
        window.record(reading(&clock, 20.0, SampleSource::Mask));
        assert_eq!(*rx.borrow(), 15.0);

        window.reset(Duration::from_secs(4));
        assert!(rx.borrow().is_nan());
        assert!(window.is_purging());
        assert!(!window.record(reading(&clock, 30.0, SampleSource::Mask)));
        assert!(window.is_empty());

        clock.advance(Duration::from_secs(4));
        assert!(!window.is_purging());
        assert!(window.record(reading(&clock, 30.0, SampleSource::Mask)));
        assert_eq!(*rx.borrow(), 30.0);
    }

    #[test]
    fn test_plain_window_never_purges() {
        let clock = ManualClock::default();
        let mut window = SampleWindow::new(
            SampleSource::Mask,
            Duration::from_secs(60),
            Arc::new(clock.clone()),
        );
        window.record(reading(&clock, 10.0, SampleSource::Mask));
        window.reset(Duration::from_secs(5));

        assert!(window.is_empty());
        assert!(!window.is_purging());
        assert!(window.record(reading(&clock, 12.0, SampleSource::Mask)));
    }
}
