use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use fittest_core::clock::{Clock, ManualClock};
use fittest_core::config::FitTestConfig;
use fittest_core::events::InstrumentEvent;
use fittest_core::execution::ExecutionState;
use fittest_core::instrument::{
    ConcentrationEvent, ConnectionStatus, ControlSource, SampleSource, StatusUpdate,
    TransmissionState,
};
use fittest_core::protocol::{ProtocolLibrary, StageDefinition};
use fittest_core::session::{InstrumentInput, Session, SessionCommand};

fn library() -> ProtocolLibrary {
    let mut library = ProtocolLibrary::new();
    library.insert(
        "Quick",
        &[StageDefinition {
            instructions: "Normal breathing".into(),
            ambient_purge: 2,
            ambient_sample: 5,
            mask_purge: 2,
            mask_sample: 5,
        }],
    );
    library
}

fn session(clock: &ManualClock) -> Session {
    Session::new(FitTestConfig::default(), library(), Arc::new(clock.clone()))
}

#[test]
fn test_status_change_notifies_once() {
    let clock = ManualClock::new(Utc::now());
    let mut session = session(&clock);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.subscribe_instrument(move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });

    session.on_status(&StatusUpdate::connection(ConnectionStatus::Waiting));
    session.on_status(&StatusUpdate::connection(ConnectionStatus::Waiting));
    session.on_status(&StatusUpdate {
        transmission_state: Some(TransmissionState::Transmitting),
        ..StatusUpdate::default()
    });
    session.on_status(&StatusUpdate::connection(ConnectionStatus::Receiving));

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            InstrumentEvent::ConnectionStatusChanged {
                previous: ConnectionStatus::Disconnected,
                current: ConnectionStatus::Waiting,
            },
            InstrumentEvent::ConnectionStatusChanged {
                previous: ConnectionStatus::Waiting,
                current: ConnectionStatus::Receiving,
            },
        ]
    );
    assert_eq!(
        session.instrument().transmission_state,
        TransmissionState::Transmitting
    );
}

#[test]
fn test_readings_reach_windows_and_listeners() {
    let clock = ManualClock::new(Utc::now());
    let mut session = session(&clock);
    let received = Arc::new(Mutex::new(0usize));
    let counter = received.clone();
    let id = session.subscribe_instrument(move |event| {
        if matches!(event, InstrumentEvent::ConcentrationReceived(_)) {
            *counter.lock().unwrap() += 1;
        }
        Ok(())
    });

    let reading = ConcentrationEvent::new(
        clock.now(),
        2800.0,
        SampleSource::Ambient,
        ControlSource::External,
    );
    session.on_input(InstrumentInput::Concentration(reading.clone()));
    assert!(session.unsubscribe_instrument(id));
    session.on_concentration(reading);

    assert_eq!(*received.lock().unwrap(), 1);
    assert_eq!(session.windows().get(SampleSource::Ambient).len(), 2);
}

#[test]
fn test_tick_listeners_share_timestamp() {
    let clock = ManualClock::new(Utc::now());
    let mut session = session(&clock);
    let stamps: Arc<Mutex<Vec<DateTime<Utc>>>> = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let sink = stamps.clone();
        session.subscribe_tick(move |now| {
            sink.lock().unwrap().push(*now);
            Ok(())
        });
    }

    let now = clock.now();
    session.on_tick(now);
    assert_eq!(*stamps.lock().unwrap(), vec![now, now, now]);
}

#[test]
fn test_protocol_runs_on_session_tick() {
    let clock = ManualClock::new(Utc::now());
    let mut session = session(&clock);
    session.on_status(&StatusUpdate::connection(ConnectionStatus::Receiving));
    session.execute_protocol("Quick").unwrap();

    for _ in 0..14 {
        clock.advance(Duration::from_secs(1));
        session.on_tick(clock.now());
    }
    assert_eq!(session.executor().state(), ExecutionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_run_serves_commands() {
    let clock = ManualClock::new(Utc::now());
    let mut session = session(&clock);
    session.on_status(&StatusUpdate::connection(ConnectionStatus::Receiving));

    let (input_tx, input_rx) = mpsc::channel(16);
    let (command_tx, command_rx) = mpsc::channel(4);
    let handle = tokio::spawn(session.run(input_rx, command_rx, CancellationToken::new()));

    let (reply, rx) = oneshot::channel();
    command_tx
        .send(SessionCommand::Execute {
            protocol: "Quick".into(),
            reply,
        })
        .await
        .unwrap();
    assert!(rx.await.unwrap().is_ok());

    input_tx
        .send(InstrumentInput::Concentration(ConcentrationEvent::new(
            clock.now(),
            31.0,
            SampleSource::Mask,
            ControlSource::External,
        )))
        .await
        .unwrap();

    let (reply, rx) = oneshot::channel();
    command_tx.send(SessionCommand::Pause { reply }).await.unwrap();
    assert!(rx.await.unwrap());

    let (reply, rx) = oneshot::channel();
    command_tx.send(SessionCommand::State { reply }).await.unwrap();
    assert_eq!(rx.await.unwrap(), ExecutionState::Paused);

    drop(input_tx);
    drop(command_tx);
    let session = handle.await.unwrap();

    // Shutting down abandons the run
    assert_eq!(session.executor().state(), ExecutionState::Idle);
    assert_eq!(session.windows().get(SampleSource::Mask).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
    let clock = ManualClock::new(Utc::now());
    let session = session(&clock);
    let (_input_tx, input_rx) = mpsc::channel::<InstrumentInput>(1);
    let (_command_tx, command_rx) = mpsc::channel::<SessionCommand>(1);
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(session.run(input_rx, command_rx, shutdown.clone()));
    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.cancel();

    let session = handle.await.unwrap();
    assert_eq!(session.executor().state(), ExecutionState::Idle);
}
