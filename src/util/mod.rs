//! Process plumbing for the relay binary.
//!
//! - [`sig_down`] - graceful shutdown on termination signals
//! - [`telemetry`] - log subscriber and optional OTLP trace export

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
