//! Execution errors

use thiserror::Error;

use super::ExecutionState;
use crate::instrument::ConnectionStatus;
use crate::protocol::{ProtocolError, SchemaValidationError};

/// Errors returned when starting a protocol run
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Unknown protocol: {0}")]
    ProtocolNotFound(String),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        state: ExecutionState,
        action: &'static str,
    },

    #[error("Protocol '{0}' has no segments")]
    EmptyProtocol(String),

    #[error("Instrument is not receiving (status: {0:?})")]
    InstrumentNotReceiving(ConnectionStatus),

    #[error("Failed to load protocol: {0}")]
    Definition(String),
}

impl From<ProtocolError> for ExecutionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::NotFound(name) => ExecutionError::ProtocolNotFound(name),
            ProtocolError::Schema(err) => ExecutionError::Schema(err),
            other => ExecutionError::Definition(other.to_string()),
        }
    }
}
