//! Observed instrument status
//!
//! [`InstrumentState`] is an immutable snapshot. Decoded status lines arrive as
//! partial [`StatusUpdate`]s and [`InstrumentState::apply`] produces the next
//! snapshot; whoever owns the snapshot decides what to announce.

use serde::{Deserialize, Serialize};

use super::{ControlSource, SampleSource};

/// State of the serial link as seen from the decoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No port open
    #[default]
    Disconnected,
    /// Port open, nothing decoded yet
    Waiting,
    /// Decoded data is flowing
    Receiving,
}

/// Whether the instrument is currently streaming readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransmissionState {
    /// Streaming halted
    #[default]
    Paused,
    /// Streaming readings
    Transmitting,
}

/// Battery and pulse indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceHealth {
    /// Indicator reported OK
    Good,
    /// Indicator reported a fault
    Bad,
    /// Not reported yet
    #[default]
    Unknown,
}

/// Coarse description of what the instrument is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activity {
    /// Connected, not counting
    Idle,
    /// Running a fit test
    Testing,
    /// Counting particles outside of a test
    Counting,
    /// No instrument
    #[default]
    Disconnected,
}

/// Snapshot of everything known about the connected instrument
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstrumentState {
    /// Link state
    pub connection_status: ConnectionStatus,
    /// Valve control mode, once reported
    pub control_source: Option<ControlSource>,
    /// Valve position, once reported
    pub sample_source: Option<SampleSource>,
    /// Streaming state
    pub transmission_state: TransmissionState,
    /// Battery indicator
    pub battery_status: DeviceHealth,
    /// Pulse (flow) indicator
    pub pulse_status: DeviceHealth,
    /// Derived activity
    pub activity: Activity,
    /// Last raw line received from the instrument
    pub last_line: String,
}

/// Partial status change; `None` fields are left untouched
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdate {
    pub connection_status: Option<ConnectionStatus>,
    pub control_source: Option<ControlSource>,
    pub sample_source: Option<SampleSource>,
    pub transmission_state: Option<TransmissionState>,
    pub battery_status: Option<DeviceHealth>,
    pub pulse_status: Option<DeviceHealth>,
    pub activity: Option<Activity>,
    pub last_line: Option<String>,
}

impl StatusUpdate {
    /// Update carrying only a connection status
    pub fn connection(status: ConnectionStatus) -> Self {
        Self {
            connection_status: Some(status),
            ..Self::default()
        }
    }

    /// Update carrying only the last raw line
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            last_line: Some(line.into()),
            ..Self::default()
        }
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl InstrumentState {
    /// Produce the snapshot that results from applying `update`
    pub fn apply(&self, update: &StatusUpdate) -> InstrumentState {
        InstrumentState {
            connection_status: update.connection_status.unwrap_or(self.connection_status),
            control_source: update.control_source.or(self.control_source),
            sample_source: update.sample_source.or(self.sample_source),
            transmission_state: update.transmission_state.unwrap_or(self.transmission_state),
            battery_status: update.battery_status.unwrap_or(self.battery_status),
            pulse_status: update.pulse_status.unwrap_or(self.pulse_status),
            activity: update.activity.unwrap_or(self.activity),
            last_line: update
                .last_line
                .clone()
                .unwrap_or_else(|| self.last_line.clone()),
        }
    }

    /// Decoded data is flowing
    pub fn is_receiving(&self) -> bool {
        self.connection_status == ConnectionStatus::Receiving
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_leaves_original_untouched() {
        let before = InstrumentState::default();
        let after = before.apply(&StatusUpdate::connection(ConnectionStatus::Receiving));

        assert_eq!(before.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(after.connection_status, ConnectionStatus::Receiving);
        assert!(after.is_receiving());
    }

    #[test]
    fn test_fields_update_independently() {
        let state = InstrumentState::default()
            .apply(&StatusUpdate {
                sample_source: Some(SampleSource::Mask),
                battery_status: Some(DeviceHealth::Bad),
                ..StatusUpdate::default()
            })
            .apply(&StatusUpdate::line("Conc. 1234 #/cc"));

        assert_eq!(state.sample_source, Some(SampleSource::Mask));
        assert_eq!(state.battery_status, DeviceHealth::Bad);
        assert_eq!(state.pulse_status, DeviceHealth::Unknown);
        assert_eq!(state.last_line, "Conc. 1234 #/cc");
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_empty_update_is_identity() {
        let state = InstrumentState {
            activity: Activity::Counting,
            ..InstrumentState::default()
        };
        let update = StatusUpdate::default();
        assert!(update.is_empty());
        assert_eq!(state.apply(&update), state);
    }
}
