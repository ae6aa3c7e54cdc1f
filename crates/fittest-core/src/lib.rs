//! # FitTest Core Library
//!
//! Core functionality for controlling a particle-counting respirator fit-test
//! instrument and running fit-test protocols against it.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port discovery and baud rate auto-detection
//! - The instrument data model (readings and status snapshots)
//! - Time-bounded sample windows with purge gating
//! - Protocol definition validation and timeline compilation
//! - Protocol execution with pause/resume/cancel and fit factor results
//!
//! ## Example
//!
//! ```rust,ignore
//! use fittest_core::prelude::*;
//!
//! let library = ProtocolLibrary::from_file("protocols.json")?;
//! let mut session = Session::new(FitTestConfig::default(), library, Arc::new(SystemClock));
//!
//! session.on_status(&StatusUpdate::connection(ConnectionStatus::Receiving));
//! session.execute_protocol("OSHA")?;
//! ```

pub mod clock;
pub mod config;
pub mod demo;
pub mod events;
pub mod execution;
pub mod instrument;
pub mod link;
pub mod protocol;
pub mod sampling;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock, Ticker};
    pub use crate::config::FitTestConfig;
    pub use crate::demo::DemoInstrument;
    pub use crate::events::{ExecutionEvent, InstrumentEvent, ListenerId};
    pub use crate::execution::{
        ExecutionError, ExecutionState, ExerciseResult, ProtocolExecutor, RunSummary,
    };
    pub use crate::instrument::{
        ConcentrationEvent, ConnectionStatus, ControlSource, InstrumentState, SampleSource,
        StatusUpdate,
    };
    pub use crate::link::{LinkConfig, LinkError, LinkNegotiator, SerialTransport};
    pub use crate::protocol::{Phase, ProtocolLibrary, Segment, StageDefinition};
    pub use crate::sampling::{SampleWindow, SampleWindows};
    pub use crate::session::{InstrumentInput, Session, SessionCommand};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
