//! Protocol execution
//!
//! The [`ProtocolExecutor`] state machine and the results it produces.

mod error;
mod executor;
pub mod results;

pub use error::ExecutionError;
pub use executor::ProtocolExecutor;
pub use results::{fit_factor, overall_fit_factor, ExerciseResult, RunSummary};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::DEFAULT_TICK_INTERVAL;

/// Default minimum readings for a sample segment average to count
pub const DEFAULT_MIN_SAMPLES: usize = 3;

/// Executor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionState {
    /// No run in progress
    #[default]
    Idle,
    /// Timeline advancing
    Executing,
    /// Timeline suspended
    Paused,
}

impl ExecutionState {
    /// The state as `"Idle"`, `"Executing"` or `"Paused"`
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "Idle",
            ExecutionState::Executing => "Executing",
            ExecutionState::Paused => "Paused",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Period of the shared tick, in milliseconds
    pub tick_interval_ms: u64,
    /// Refuse to start unless the instrument is streaming
    pub require_receiving: bool,
    /// Readings needed for a sample segment average
    pub min_samples: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            require_receiving: true,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        assert_eq!(ExecutionState::Idle.to_string(), "Idle");
        assert_eq!(
            serde_json::to_string(&ExecutionState::Executing).unwrap(),
            "\"Executing\""
        );
        assert_eq!(ExecutionState::Paused.as_str(), "Paused");
    }
}
