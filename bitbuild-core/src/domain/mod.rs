//! Core domain types
//!
//! These types describe one bitstream build attempt from request to the
//! final image record. They are shared between the conversion client and
//! the runner that drives the pipeline.

pub mod build;
pub mod host;
pub mod image;
pub mod log;
