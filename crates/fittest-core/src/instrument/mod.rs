//! Instrument data model
//!
//! Readings and status reported by the fit-test instrument once its serial
//! output has been decoded. The decoder itself lives outside this crate; it
//! hands over [`ConcentrationEvent`]s and [`StatusUpdate`]s.

mod status;

pub use status::{
    Activity, ConnectionStatus, DeviceHealth, InstrumentState, StatusUpdate, TransmissionState,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the respirator the instrument is sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    /// Room air outside the respirator
    Ambient,
    /// Air inside the respirator
    Mask,
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleSource::Ambient => write!(f, "ambient"),
            SampleSource::Mask => write!(f, "mask"),
        }
    }
}

/// Who is switching the instrument's sample valve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSource {
    /// The instrument runs its own built-in protocol
    Internal,
    /// This software drives the instrument
    External,
    /// Front-panel operation
    Manual,
}

/// A single particle concentration reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationEvent {
    timestamp: DateTime<Utc>,
    concentration: f64,
    sample_source: SampleSource,
    control_source: ControlSource,
}

impl ConcentrationEvent {
    /// Create a reading. Negative concentrations are clamped to zero.
    pub fn new(
        timestamp: DateTime<Utc>,
        concentration: f64,
        sample_source: SampleSource,
        control_source: ControlSource,
    ) -> Self {
        Self {
            timestamp,
            concentration: concentration.max(0.0),
            sample_source,
            control_source,
        }
    }

    /// When the reading was taken
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Particles per cubic centimetre
    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    /// Which side was being sampled
    pub fn sample_source(&self) -> SampleSource {
        self.sample_source
    }

    /// Who was controlling the sample valve
    pub fn control_source(&self) -> ControlSource {
        self.control_source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_concentration_clamped() {
        let event = ConcentrationEvent::new(
            Utc::now(),
            -3.5,
            SampleSource::Mask,
            ControlSource::External,
        );
        assert_eq!(event.concentration(), 0.0);
    }

    #[test]
    fn test_sample_source_serde_names() {
        assert_eq!(
            serde_json::to_string(&SampleSource::Ambient).unwrap(),
            "\"ambient\""
        );
        assert_eq!(SampleSource::Mask.to_string(), "mask");
    }
}
