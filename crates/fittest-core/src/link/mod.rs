//! Instrument link
//!
//! Finding and opening the serial port the instrument is attached to, and
//! negotiating its baud rate.

mod error;
pub mod negotiator;
pub mod serial;

pub use error::LinkError;
pub use negotiator::{score_chunk, LinkConfig, LinkNegotiator, DEFAULT_CANDIDATE_RATES};
pub use serial::{list_ports, PortInfo, TokioSerialTransport};

use tokio::io::AsyncRead;

/// Something that can open the instrument's byte stream at a given rate.
///
/// Dropping the returned reader closes the port.
pub trait SerialTransport {
    /// Readable side of the opened port
    type Reader: AsyncRead + Unpin;

    /// Open the port at `baud_rate`
    fn open(&mut self, baud_rate: u32) -> Result<Self::Reader, LinkError>;
}
