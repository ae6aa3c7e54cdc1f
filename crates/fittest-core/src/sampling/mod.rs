//! Concentration sampling
//!
//! Rolling per-source windows over the live concentration stream.

mod window;

pub use window::{SampleWindow, INSUFFICIENT_SAMPLES};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::instrument::{ConcentrationEvent, SampleSource};

/// Long enough to hold the longest allowed mask sample
pub const DEFAULT_WINDOW_MAX_AGE_MS: u64 = 600_000;

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// How long readings are retained, in milliseconds
    pub window_max_age_ms: u64,
    /// Ignore readings while a purge is running
    pub purge_gating: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            window_max_age_ms: DEFAULT_WINDOW_MAX_AGE_MS,
            purge_gating: true,
        }
    }
}

/// The ambient and mask windows of one instrument
pub struct SampleWindows {
    ambient: SampleWindow,
    mask: SampleWindow,
}

impl SampleWindows {
    /// Build both windows, each publishing its rolling average
    pub fn new(config: &SamplingConfig, clock: Arc<dyn Clock>) -> Self {
        let build = |source| {
            let max_age = Duration::from_millis(config.window_max_age_ms);
            let window = if config.purge_gating {
                SampleWindow::gated(source, max_age, clock.clone())
            } else {
                SampleWindow::new(source, max_age, clock.clone())
            };
            window.with_publisher(watch::channel(f64::NAN).0)
        };
        Self {
            ambient: build(SampleSource::Ambient),
            mask: build(SampleSource::Mask),
        }
    }

    /// Window for `source`
    pub fn get(&self, source: SampleSource) -> &SampleWindow {
        match source {
            SampleSource::Ambient => &self.ambient,
            SampleSource::Mask => &self.mask,
        }
    }

    /// Mutable window for `source`
    pub fn get_mut(&mut self, source: SampleSource) -> &mut SampleWindow {
        match source {
            SampleSource::Ambient => &mut self.ambient,
            SampleSource::Mask => &mut self.mask,
        }
    }

    /// Route a reading to the window of its source
    pub fn record(&mut self, event: ConcentrationEvent) -> bool {
        self.get_mut(event.sample_source()).record(event)
    }

    /// Clear `source`'s window and start a purge
    pub fn reset(&mut self, source: SampleSource, purge: Duration) {
        self.get_mut(source).reset(purge);
    }

    /// Follow the published rolling average of `source`
    pub fn subscribe_average(&self, source: SampleSource) -> Option<watch::Receiver<f64>> {
        self.get(source).subscribe_average()
    }
}
