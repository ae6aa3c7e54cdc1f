//! Protocol run against the simulated instrument

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use fittest_core::clock::SystemClock;
use fittest_core::config::FitTestConfig;
use fittest_core::demo::DemoInstrument;
use fittest_core::events::ExecutionEvent;
use fittest_core::instrument::{ConnectionStatus, SampleSource, StatusUpdate};
use fittest_core::protocol::ProtocolLibrary;
use fittest_core::session::{InstrumentInput, Session, SessionCommand};

const READING_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(
    config: FitTestConfig,
    library: ProtocolLibrary,
    protocol: &str,
    fit_factor: f64,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let mut session = Session::new(config, library, Arc::new(SystemClock));
    session.on_status(&StatusUpdate::connection(ConnectionStatus::Receiving));

    let shutdown = CancellationToken::new();
    let (source_tx, source_rx) = watch::channel(SampleSource::Ambient);

    {
        let shutdown = shutdown.clone();
        session.executor_mut().subscribe(move |event| {
            match event {
                ExecutionEvent::Started {
                    protocol,
                    segment_count,
                    total_duration_seconds,
                    ..
                } => println!(
                    "{}: {} segments, {} s",
                    protocol, segment_count, total_duration_seconds
                ),
                ExecutionEvent::SegmentChanged(segment) => {
                    source_tx.send_replace(segment.source);
                    println!(
                        "[{:>4} s] {} {} ({} s): {}",
                        segment.protocol_offset_seconds,
                        segment.source,
                        segment.phase,
                        segment.duration_seconds,
                        segment.instructions
                    );
                }
                ExecutionEvent::ExerciseCompleted(result) => match result.fit_factor {
                    Some(ff) => println!("exercise {}: fit factor {:.0}", result.exercise_number, ff),
                    None => println!("exercise {}: not enough readings", result.exercise_number),
                },
                ExecutionEvent::Completed(summary) => {
                    match summary.overall_fit_factor {
                        Some(ff) => println!("overall fit factor {:.0}", ff),
                        None => println!("overall fit factor unavailable"),
                    }
                    shutdown.cancel();
                }
                ExecutionEvent::Cancelled { .. } => {
                    println!("cancelled");
                    shutdown.cancel();
                }
                ExecutionEvent::SegmentDataUpdated(_) => {}
            }
            Ok(())
        });
    }

    let (input_tx, input_rx) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(8);

    let runner = tokio::spawn(session.run(input_rx, command_rx, shutdown.clone()));
    let feeder = tokio::spawn(feed_readings(
        input_tx,
        source_rx,
        fit_factor,
        seed,
        shutdown.clone(),
    ));

    let (reply_tx, reply_rx) = oneshot::channel();
    command_tx
        .send(SessionCommand::Execute {
            protocol: protocol.to_string(),
            reply: reply_tx,
        })
        .await?;
    if let Err(e) = reply_rx.await? {
        shutdown.cancel();
        let _ = runner.await;
        feeder.abort();
        return Err(e.into());
    }

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            let (reply, _) = oneshot::channel();
            if command_tx.send(SessionCommand::Cancel { reply }).await.is_ok() {
                shutdown.cancelled().await;
            }
        }
    }

    runner.await?;
    feeder.await?;
    Ok(())
}

async fn feed_readings(
    inputs: mpsc::Sender<InstrumentInput>,
    source: watch::Receiver<SampleSource>,
    fit_factor: f64,
    seed: Option<u64>,
    shutdown: CancellationToken,
) {
    let mut instrument = match seed {
        Some(seed) => DemoInstrument::seeded(fit_factor, seed),
        None => DemoInstrument::new(fit_factor),
    };
    let mut interval = tokio::time::interval(READING_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let reading = instrument.sample(*source.borrow(), Utc::now());
        if inputs
            .send(InstrumentInput::Concentration(reading))
            .await
            .is_err()
        {
            return;
        }
    }
}
