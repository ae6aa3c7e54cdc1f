//! Fit-test session
//!
//! Owns everything that changes while an instrument is connected: the
//! observed [`InstrumentState`], the [`SampleWindows`] and the
//! [`ProtocolExecutor`]. All of it is mutated from one place, either by
//! calling the `on_*` methods directly or by running [`Session::run`], which
//! multiplexes decoded instrument input, control commands and the shared
//! tick on a single task.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{Clock, Ticker};
use crate::config::FitTestConfig;
use crate::events::{InstrumentEvent, ListenerId, Listeners, TickEvent};
use crate::execution::{ExecutionError, ExecutionState, ProtocolExecutor};
use crate::instrument::{ConcentrationEvent, InstrumentState, StatusUpdate};
use crate::protocol::ProtocolLibrary;
use crate::sampling::SampleWindows;

/// Output of the external line decoder
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentInput {
    /// A concentration reading
    Concentration(ConcentrationEvent),
    /// A partial status change
    Status(StatusUpdate),
}

/// Control requests accepted by [`Session::run`]
#[derive(Debug)]
pub enum SessionCommand {
    /// Start a protocol by name
    Execute {
        protocol: String,
        reply: oneshot::Sender<Result<Uuid, ExecutionError>>,
    },
    /// Pause the running protocol
    Pause { reply: oneshot::Sender<bool> },
    /// Resume a paused protocol
    Resume { reply: oneshot::Sender<bool> },
    /// Cancel the running protocol
    Cancel { reply: oneshot::Sender<bool> },
    /// Read the execution state
    State {
        reply: oneshot::Sender<ExecutionState>,
    },
}

/// One connected instrument and its protocol runs
pub struct Session {
    config: FitTestConfig,
    clock: Arc<dyn Clock>,
    instrument: InstrumentState,
    windows: SampleWindows,
    executor: ProtocolExecutor,
    instrument_listeners: Listeners<InstrumentEvent>,
    tick_listeners: Listeners<TickEvent>,
}

impl Session {
    /// New session; the instrument starts out disconnected
    pub fn new(config: FitTestConfig, library: ProtocolLibrary, clock: Arc<dyn Clock>) -> Self {
        let windows = SampleWindows::new(&config.sampling, clock.clone());
        let executor = ProtocolExecutor::new(library, config.execution.clone(), clock.clone());
        Self {
            config,
            clock,
            instrument: InstrumentState::default(),
            windows,
            executor,
            instrument_listeners: Listeners::new(),
            tick_listeners: Listeners::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &FitTestConfig {
        &self.config
    }

    /// Latest instrument snapshot
    pub fn instrument(&self) -> &InstrumentState {
        &self.instrument
    }

    /// Sample windows
    pub fn windows(&self) -> &SampleWindows {
        &self.windows
    }

    /// Protocol executor (read side)
    pub fn executor(&self) -> &ProtocolExecutor {
        &self.executor
    }

    /// Protocol executor, for subscribing to execution events
    pub fn executor_mut(&mut self) -> &mut ProtocolExecutor {
        &mut self.executor
    }

    /// Listen for connection changes and readings
    pub fn subscribe_instrument<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&InstrumentEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.instrument_listeners.subscribe(listener)
    }

    /// Remove an instrument listener
    pub fn unsubscribe_instrument(&mut self, id: ListenerId) -> bool {
        self.instrument_listeners.unsubscribe(id)
    }

    /// Listen for the shared tick
    pub fn subscribe_tick<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&TickEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.tick_listeners.subscribe(listener)
    }

    /// Remove a tick listener
    pub fn unsubscribe_tick(&mut self, id: ListenerId) -> bool {
        self.tick_listeners.unsubscribe(id)
    }

    /// Handle a decoded reading
    pub fn on_concentration(&mut self, event: ConcentrationEvent) {
        self.instrument_listeners
            .emit(&InstrumentEvent::ConcentrationReceived(event.clone()));
        self.executor.on_concentration(&event);
        self.windows.record(event);
    }

    /// Handle a decoded status change
    pub fn on_status(&mut self, update: &StatusUpdate) {
        let previous = self.instrument.connection_status;
        self.instrument = self.instrument.apply(update);
        let current = self.instrument.connection_status;
        if previous != current {
            tracing::info!(?previous, ?current, "instrument connection status changed");
            self.instrument_listeners
                .emit(&InstrumentEvent::ConnectionStatusChanged { previous, current });
        }
    }

    /// Handle decoder output of either kind
    pub fn on_input(&mut self, input: InstrumentInput) {
        match input {
            InstrumentInput::Concentration(event) => self.on_concentration(event),
            InstrumentInput::Status(update) => self.on_status(&update),
        }
    }

    /// Handle one round of the shared tick
    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        self.tick_listeners.emit(&now);
        self.executor.on_tick(now, &mut self.windows);
    }

    /// Start a protocol
    pub fn execute_protocol(&mut self, name: &str) -> Result<Uuid, ExecutionError> {
        self.executor
            .execute_protocol(name, &mut self.windows, &self.instrument)
    }

    /// Pause the running protocol
    pub fn pause(&mut self) -> bool {
        self.executor.pause()
    }

    /// Resume a paused protocol
    pub fn resume(&mut self) -> bool {
        self.executor.resume()
    }

    /// Cancel the running protocol
    pub fn cancel(&mut self) -> bool {
        self.executor.cancel()
    }

    /// Handle a control command, replying on its channel
    pub fn on_command(&mut self, command: SessionCommand) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            SessionCommand::Execute { protocol, reply } => {
                let _ = reply.send(self.execute_protocol(&protocol));
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            SessionCommand::Cancel { reply } => {
                let _ = reply.send(self.cancel());
            }
            SessionCommand::State { reply } => {
                let _ = reply.send(self.executor.state());
            }
        }
    }

    /// Tick source matching the configured interval and this session's clock
    pub fn ticker(&self) -> Ticker {
        Ticker::new(
            std::time::Duration::from_millis(self.config.execution.tick_interval_ms),
            self.clock.clone(),
        )
    }

    /// Serve inputs, commands and ticks until `shutdown` fires or both
    /// channels close. Returns the session for inspection.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<InstrumentInput>,
        mut commands: mpsc::Receiver<SessionCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        let mut ticker = self.ticker();
        let mut inputs_open = true;
        let mut commands_open = true;

        tracing::info!(period = ?ticker.period(), "session started");
        while inputs_open || commands_open {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                input = inputs.recv(), if inputs_open => match input {
                    Some(input) => self.on_input(input),
                    None => inputs_open = false,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => commands_open = false,
                },
                now = ticker.tick() => self.on_tick(now),
            }
        }

        if self.executor.state() != ExecutionState::Idle {
            tracing::warn!("session stopping with a protocol in progress");
            self.executor.cancel();
        }
        tracing::info!("session stopped");
        self
    }
}
