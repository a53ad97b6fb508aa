//! Log domain types

use serde::{Deserialize, Serialize};

use super::build::BuildStage;

/// A progress record emitted while a build runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    /// Stage the record belongs to, if any
    pub stage: Option<BuildStage>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
