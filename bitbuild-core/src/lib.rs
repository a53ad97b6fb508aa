//! Bitbuild Core
//!
//! Core types for the bitstream build pipeline.
//!
//! This crate contains:
//! - Domain types: build jobs, stages, hosts, conversion jobs and image descriptors
//! - DTOs: request/response bodies exchanged with the image conversion service

pub mod domain;
pub mod dto;
