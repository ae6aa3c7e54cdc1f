//! Link errors

use thiserror::Error;

/// Errors that can occur while opening or probing the instrument link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Link negotiation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<tokio_serial::Error> for LinkError {
    fn from(e: tokio_serial::Error) -> Self {
        match e.kind {
            tokio_serial::ErrorKind::NoDevice => LinkError::PortNotFound(e.description),
            _ => LinkError::SerialError(e.to_string()),
        }
    }
}
