//! Scheduler layer for the runner
//!
//! Drives asynchronous image conversion jobs to a terminal state. Polling
//! runs as a cancellable task so a supervisor can stop it without killing
//! the whole process.

pub mod poller;

pub use poller::{ConversionPoller, PollTask};
