//! Protocol executor
//!
//! Walks a compiled segment timeline. Progress is driven only by the shared
//! tick: a segment ends when the run's elapsed time reaches the segment's end
//! offset. Elapsed time stops while paused.
//!
//! Transitions:
//!
//! | From              | Call / trigger      | To        |
//! |-------------------|---------------------|-----------|
//! | Idle              | `execute_protocol`  | Executing |
//! | Executing         | `pause`             | Paused    |
//! | Paused            | `resume`            | Executing |
//! | Executing, Paused | `cancel`            | Idle      |
//! | Executing         | last segment ends   | Idle      |
//!
//! `execute_protocol` outside Idle is an error. `pause`, `resume` and
//! `cancel` outside their rows do nothing and return `false`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    overall_fit_factor, ExecutionConfig, ExecutionError, ExecutionState, ExerciseResult,
    RunSummary,
};
use crate::clock::{elapsed_ms, Clock};
use crate::events::{ExecutionEvent, ListenerId, Listeners};
use crate::instrument::{ConcentrationEvent, InstrumentState, SampleSource};
use crate::protocol::{Phase, ProtocolLibrary, Segment};
use crate::sampling::SampleWindows;

/// A run in progress
struct ActiveRun {
    run_id: Uuid,
    protocol: String,
    started_at: DateTime<Utc>,
    segments: Vec<Segment>,
    current: usize,
    /// Elapsed run time banked up to `anchor`
    elapsed_ms: u64,
    /// Last time elapsed was banked; `None` while paused
    anchor: Option<DateTime<Utc>>,
    last_ambient_average: Option<f64>,
    exercises: Vec<ExerciseResult>,
}

impl ActiveRun {
    fn bank_elapsed(&mut self, now: DateTime<Utc>) {
        if let Some(anchor) = self.anchor {
            self.elapsed_ms += elapsed_ms(anchor, now);
            self.anchor = Some(anchor.max(now));
        }
    }

    fn current_segment(&self) -> &Segment {
        &self.segments[self.current]
    }
}

/// Runs fit-test protocols against the sample windows
pub struct ProtocolExecutor {
    library: ProtocolLibrary,
    config: ExecutionConfig,
    clock: Arc<dyn Clock>,
    state: ExecutionState,
    run: Option<ActiveRun>,
    listeners: Listeners<ExecutionEvent>,
}

impl ProtocolExecutor {
    /// Idle executor over `library`
    pub fn new(library: ProtocolLibrary, config: ExecutionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            library,
            config,
            clock,
            state: ExecutionState::Idle,
            run: None,
            listeners: Listeners::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Active configuration
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Protocol definitions
    pub fn library(&self) -> &ProtocolLibrary {
        &self.library
    }

    /// Replace the protocol definitions. A run in progress keeps its timeline.
    pub fn set_library(&mut self, library: ProtocolLibrary) {
        self.library = library;
    }

    /// Id of the run in progress
    pub fn run_id(&self) -> Option<Uuid> {
        self.run.as_ref().map(|run| run.run_id)
    }

    /// Name of the protocol in progress
    pub fn protocol_name(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.protocol.as_str())
    }

    /// The active segment
    pub fn current_segment(&self) -> Option<&Segment> {
        self.run.as_ref().map(ActiveRun::current_segment)
    }

    /// Timeline of the run in progress; empty when idle
    pub fn segments(&self) -> &[Segment] {
        self.run
            .as_ref()
            .map(|run| run.segments.as_slice())
            .unwrap_or(&[])
    }

    /// Run time so far, excluding pauses
    pub fn elapsed(&self) -> Duration {
        let Some(run) = &self.run else {
            return Duration::ZERO;
        };
        let pending = run
            .anchor
            .map(|anchor| elapsed_ms(anchor, self.clock.now()))
            .unwrap_or(0);
        Duration::from_millis(run.elapsed_ms + pending)
    }

    /// Register a lifecycle/progress listener
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ExecutionEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Remove a listener
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Start the named protocol.
    ///
    /// Both windows are cleared so readings from before the run are not
    /// averaged; if the first segment is a purge its window starts purging.
    pub fn execute_protocol(
        &mut self,
        name: &str,
        windows: &mut SampleWindows,
        instrument: &InstrumentState,
    ) -> Result<Uuid, ExecutionError> {
        if self.state != ExecutionState::Idle {
            return Err(ExecutionError::InvalidState {
                state: self.state,
                action: "execute a protocol",
            });
        }
        if self.config.require_receiving && !instrument.is_receiving() {
            return Err(ExecutionError::InstrumentNotReceiving(
                instrument.connection_status,
            ));
        }

        let segments = self.library.compile(name)?;
        let Some(first) = segments.first().cloned() else {
            return Err(ExecutionError::EmptyProtocol(name.to_string()));
        };

        for source in [SampleSource::Ambient, SampleSource::Mask] {
            let purge = if source == first.source && first.is_purge() {
                Duration::from_secs(first.duration_seconds.into())
            } else {
                Duration::ZERO
            };
            windows.reset(source, purge);
        }

        let now = self.clock.now();
        let run_id = Uuid::new_v4();
        let total_duration_seconds = segments.last().map(Segment::end_offset_seconds).unwrap_or(0);
        let segment_count = segments.len();

        self.run = Some(ActiveRun {
            run_id,
            protocol: name.to_string(),
            started_at: now,
            segments,
            current: 0,
            elapsed_ms: 0,
            anchor: Some(now),
            last_ambient_average: None,
            exercises: Vec::new(),
        });
        self.state = ExecutionState::Executing;

        tracing::info!(
            %run_id,
            protocol = name,
            segment_count,
            total_duration_seconds,
            "protocol started"
        );
        self.listeners.emit(&ExecutionEvent::Started {
            run_id,
            protocol: name.to_string(),
            segment_count,
            total_duration_seconds,
        });
        self.listeners.emit(&ExecutionEvent::SegmentChanged(first));

        Ok(run_id)
    }

    /// Suspend the timeline. Only valid while executing.
    pub fn pause(&mut self) -> bool {
        if self.state != ExecutionState::Executing {
            tracing::debug!(state = %self.state, "pause ignored");
            return false;
        }
        let now = self.clock.now();
        if let Some(run) = self.run.as_mut() {
            run.bank_elapsed(now);
            run.anchor = None;
        }
        self.state = ExecutionState::Paused;
        tracing::info!(elapsed = ?self.elapsed(), "protocol paused");
        true
    }

    /// Continue from where the timeline was paused. Only valid while paused.
    pub fn resume(&mut self) -> bool {
        if self.state != ExecutionState::Paused {
            tracing::debug!(state = %self.state, "resume ignored");
            return false;
        }
        let now = self.clock.now();
        if let Some(run) = self.run.as_mut() {
            run.anchor = Some(now);
        }
        self.state = ExecutionState::Executing;
        tracing::info!(elapsed = ?self.elapsed(), "protocol resumed");
        true
    }

    /// Abandon the run. Only valid while executing or paused.
    pub fn cancel(&mut self) -> bool {
        if self.state == ExecutionState::Idle {
            tracing::debug!("cancel ignored, nothing running");
            return false;
        }
        let run = self.run.take();
        self.state = ExecutionState::Idle;

        if let Some(run) = run {
            tracing::info!(run_id = %run.run_id, protocol = %run.protocol, "protocol cancelled");
            self.listeners
                .emit(&ExecutionEvent::Cancelled { run_id: run.run_id });
        }
        true
    }

    /// Record a reading against the active segment if its source matches.
    ///
    /// Readings arriving while not executing are dropped.
    pub fn on_concentration(&mut self, event: &ConcentrationEvent) -> bool {
        if self.state != ExecutionState::Executing {
            return false;
        }
        let Some(run) = self.run.as_mut() else {
            return false;
        };

        let segment = &mut run.segments[run.current];
        if segment.source != event.sample_source() {
            return false;
        }
        segment.recorded_data.push(event.clone());
        let update = ExecutionEvent::SegmentDataUpdated(segment.clone());
        self.listeners.emit(&update);
        true
    }

    /// Advance the timeline to the tick time `now`
    pub fn on_tick(&mut self, now: DateTime<Utc>, windows: &mut SampleWindows) {
        if self.state != ExecutionState::Executing {
            return;
        }
        if let Some(run) = self.run.as_mut() {
            run.bank_elapsed(now);
        }

        loop {
            let Some(run) = self.run.as_ref() else {
                return;
            };
            let end_ms = u64::from(run.current_segment().end_offset_seconds()) * 1000;
            if run.elapsed_ms < end_ms {
                return;
            }

            self.finish_segment(windows);
            if !self.advance(windows) {
                self.complete(now);
                return;
            }
        }
    }

    /// Capture the window average of a finished sample segment
    fn finish_segment(&mut self, windows: &SampleWindows) {
        let min_samples = self.config.min_samples;
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let segment = &mut run.segments[run.current];
        if segment.phase != Phase::Sample {
            return;
        }

        let window = windows.get(segment.source);
        let average = window.segment_average(
            Duration::from_secs(segment.duration_seconds.into()),
            min_samples,
        );
        segment.average = (average.is_finite() && average >= 0.0).then_some(average);
        tracing::debug!(
            segment = segment.index,
            source = %segment.source,
            average = ?segment.average,
            "sample segment finished"
        );

        match segment.source {
            SampleSource::Ambient => run.last_ambient_average = segment.average,
            SampleSource::Mask => {
                if let Some(exercise_number) = segment.exercise_number {
                    let result = ExerciseResult::new(
                        exercise_number,
                        segment.stage_index,
                        run.last_ambient_average,
                        segment.average,
                    );
                    tracing::info!(
                        exercise = exercise_number,
                        fit_factor = ?result.fit_factor,
                        "exercise completed"
                    );
                    run.exercises.push(result.clone());
                    self.listeners
                        .emit(&ExecutionEvent::ExerciseCompleted(result));
                }
            }
        }
    }

    /// Move to the next segment. Returns false when the timeline is done.
    fn advance(&mut self, windows: &mut SampleWindows) -> bool {
        let Some(run) = self.run.as_mut() else {
            return false;
        };
        if run.current + 1 >= run.segments.len() {
            return false;
        }
        run.current += 1;

        let segment = run.current_segment().clone();
        if segment.is_purge() {
            windows.reset(
                segment.source,
                Duration::from_secs(segment.duration_seconds.into()),
            );
        }
        tracing::debug!(
            segment = segment.index,
            source = %segment.source,
            phase = %segment.phase,
            "segment changed"
        );
        self.listeners.emit(&ExecutionEvent::SegmentChanged(segment));
        true
    }

    fn complete(&mut self, now: DateTime<Utc>) {
        let Some(run) = self.run.take() else {
            return;
        };
        self.state = ExecutionState::Idle;

        let summary = RunSummary {
            run_id: run.run_id,
            protocol: run.protocol,
            started_at: run.started_at,
            finished_at: now,
            overall_fit_factor: overall_fit_factor(&run.exercises),
            exercises: run.exercises,
        };
        tracing::info!(
            run_id = %summary.run_id,
            overall_fit_factor = ?summary.overall_fit_factor,
            "protocol completed"
        );
        self.listeners.emit(&ExecutionEvent::Completed(summary));
    }
}
