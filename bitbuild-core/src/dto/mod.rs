//! Data Transfer Objects for the image conversion service
//!
//! Lightweight request/response shapes used by conversion clients.

pub mod image;
