//! Bitbuild Runner
//!
//! Turns a hardware design into a deployable FPGA image and supervises the
//! build host doing the work.
//!
//! Architecture:
//! - Executor: runs commands and bulk copies on the build host
//! - Host: acquires and releases local or remote build hosts
//! - Pipeline: the ordered build stages, from design generation to notify
//! - Scheduler: cancellable polling of the image conversion job
//! - Orchestrator: drives one job and guarantees host release and exactly
//!   one notification

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod hook;
pub mod host;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{BuildError, Result};
pub use orchestrator::{BuildOrchestrator, BuildOutcome};
