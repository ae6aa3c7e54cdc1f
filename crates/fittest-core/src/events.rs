//! Outward events and listener registration
//!
//! Consumers (UI, data recorders) subscribe closures to a [`Listeners`]
//! registry. A listener that fails or panics is logged and skipped; the rest
//! still receive the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

use crate::execution::{ExerciseResult, RunSummary};
use crate::instrument::{ConcentrationEvent, ConnectionStatus};
use crate::protocol::Segment;

/// Handle returned by [`Listeners::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn FnMut(&E) -> anyhow::Result<()> + Send>;

/// Registry of listeners for one event type
pub struct Listeners<E> {
    next_id: u64,
    entries: Vec<(ListenerId, Listener<E>)>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<E> Listeners<E> {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; events are delivered in subscription order
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&E) -> anyhow::Result<()> + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nobody is listening
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver `event` to every listener. Returns how many of them failed.
    pub fn emit(&mut self, event: &E) -> usize {
        let mut failures = 0;
        for (id, listener) in self.entries.iter_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(listener = ?id, "listener failed: {:#}", e);
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(listener = ?id, "listener panicked");
                }
            }
        }
        failures
    }
}

/// Events about the instrument itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentEvent {
    /// The link state changed
    ConnectionStatusChanged {
        previous: ConnectionStatus,
        current: ConnectionStatus,
    },
    /// A decoded reading arrived
    ConcentrationReceived(ConcentrationEvent),
}

/// Protocol run lifecycle and progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
    /// A run began
    Started {
        run_id: Uuid,
        protocol: String,
        segment_count: usize,
        total_duration_seconds: u32,
    },
    /// The active segment changed
    SegmentChanged(Segment),
    /// The active segment recorded another reading
    SegmentDataUpdated(Segment),
    /// A mask sample finished and its fit factor is known
    ExerciseCompleted(ExerciseResult),
    /// The run was cancelled
    Cancelled { run_id: Uuid },
    /// The final segment finished
    Completed(RunSummary),
}

/// Shared periodic tick, stamped once per round
pub type TickEvent = DateTime<Utc>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_failing_listener_does_not_stop_dispatch() {
        let mut listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(AtomicUsize::new(0));

        listeners.subscribe(|_| anyhow::bail!("broken consumer"));
        listeners.subscribe(|_| panic!("very broken consumer"));
        let counter = seen.clone();
        listeners.subscribe(move |value| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(listeners.emit(&3), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let mut listeners: Listeners<()> = Listeners::new();
        let first = listeners.subscribe(|_| Ok(()));
        let second = listeners.subscribe(|_| Ok(()));
        assert_ne!(first, second);

        assert!(listeners.unsubscribe(first));
        assert!(!listeners.unsubscribe(first));
        assert_eq!(listeners.len(), 1);
    }
}
