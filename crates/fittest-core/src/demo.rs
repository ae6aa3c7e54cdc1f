//! Demo Mode - Simulated instrument for running protocols without hardware
//!
//! Room air sits around a few thousand particles/cc with a slow drift. The
//! mask side is the ambient level divided by a configurable fit factor, with
//! occasional leaks (the subject talking or bending) that briefly raise the
//! mask concentration.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::instrument::{ConcentrationEvent, ControlSource, SampleSource};

const AMBIENT_BASE: f64 = 3500.0;

/// Simulated instrument
pub struct DemoInstrument {
    /// Fit factor of the simulated respirator
    fit_factor: f64,
    /// Time of the first reading (ms since epoch)
    start_ms: Option<i64>,
    /// When the next leak begins (ms from start)
    next_leak_at_ms: i64,
    leak: LeakState,
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LeakState {
    /// Seal holding
    Sealed,
    /// Seal broken, started at `start_ms` with the given severity
    Leaking { start_ms: i64, severity: f64 },
}

const LEAK_MS: i64 = 3000;

impl DemoInstrument {
    /// Simulate a respirator with the given fit factor
    pub fn new(fit_factor: f64) -> Self {
        Self::with_rng(fit_factor, StdRng::from_entropy())
    }

    /// Reproducible simulation
    pub fn seeded(fit_factor: f64, seed: u64) -> Self {
        Self::with_rng(fit_factor, StdRng::seed_from_u64(seed))
    }

    fn with_rng(fit_factor: f64, mut rng: StdRng) -> Self {
        let first_leak = rng.gen_range(20_000..40_000);
        Self {
            fit_factor: fit_factor.max(1.0),
            start_ms: None,
            next_leak_at_ms: first_leak,
            leak: LeakState::Sealed,
            rng,
        }
    }

    /// Produce a reading for `source` at `now`
    pub fn sample(&mut self, source: SampleSource, now: DateTime<Utc>) -> ConcentrationEvent {
        let now_ms = now.timestamp_millis();
        let start_ms = *self.start_ms.get_or_insert(now_ms);
        let sim_time = now_ms - start_ms;
        self.update_leak(sim_time);

        let t = sim_time as f64 / 1000.0;
        let drift = 300.0 * (t / 45.0).sin() + 120.0 * (t / 7.0).sin();
        let ambient = AMBIENT_BASE + drift + self.rng.gen_range(-80.0..80.0);

        let concentration = match source {
            SampleSource::Ambient => ambient,
            SampleSource::Mask => {
                let leak_factor = match self.leak {
                    LeakState::Sealed => 1.0,
                    LeakState::Leaking { severity, .. } => severity,
                };
                let mask = ambient * leak_factor / self.fit_factor;
                mask * self.rng.gen_range(0.85..1.15)
            }
        };

        ConcentrationEvent::new(now, concentration, source, ControlSource::External)
    }

    fn update_leak(&mut self, sim_time: i64) {
        match self.leak {
            LeakState::Sealed => {
                if sim_time >= self.next_leak_at_ms {
                    let severity = self.rng.gen_range(2.0..8.0);
                    self.leak = LeakState::Leaking {
                        start_ms: sim_time,
                        severity,
                    };
                }
            }
            LeakState::Leaking { start_ms, .. } => {
                if sim_time >= start_ms + LEAK_MS {
                    self.leak = LeakState::Sealed;
                    self.next_leak_at_ms = sim_time + self.rng.gen_range(20_000..40_000);
                }
            }
        }
    }
}
