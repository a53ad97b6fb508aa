//! Error types for the build pipeline

use bitbuild_client::ClientError;
use bitbuild_core::domain::build::BuildStage;
use bitbuild_core::domain::image::{ConversionStatus, TagError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that abort a build
#[derive(Debug, Error)]
pub enum BuildError {
    /// A stage command exited non-zero
    #[error("Stage {stage} failed with exit code {exit_code}")]
    StageFailure {
        stage: BuildStage,
        exit_code: i32,
        /// Captured output of the failing command
        diagnostic: String,
    },

    /// Zero or several candidate artifacts in the output directory
    #[error("Expected exactly one artifact in {}, found {found}", .dir.display())]
    ArtifactAmbiguity { dir: PathBuf, found: usize },

    /// The image job ended in a state other than available
    #[error("Image conversion {job_id} ended with status {status}")]
    ConversionFailure {
        job_id: String,
        status: ConversionStatus,
        detail: Option<String>,
    },

    /// The build host could not be acquired
    #[error("Build host {host} unavailable: {reason}")]
    ResourceUnavailable { host: String, reason: String },

    /// Polling exceeded its attempt or time ceiling
    #[error("Image conversion {job_id} still pending after {attempts} polls")]
    PollTimeout { job_id: String, attempts: u32 },

    /// A command could not be started at all
    #[error("Failed to run command on {host}: {reason}")]
    Executor { host: String, reason: String },

    /// The run was cancelled by its supervisor
    #[error("Build was cancelled")]
    Cancelled,

    /// The pipeline task ended abnormally
    #[error("Unexpected fault: {0}")]
    Fault(String),

    /// Provenance tags were rejected
    #[error("Invalid image tags: {0}")]
    Tags(#[from] TagError),

    /// Conversion service error
    #[error("Image service error: {0}")]
    Client(#[from] ClientError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    /// Create a stage failure from a command's exit code and output
    pub fn stage_failed(stage: BuildStage, exit_code: i32, diagnostic: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn unavailable(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Exit code of the failing command, if the error came from one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::StageFailure { exit_code, .. } => Some(*exit_code),
            Self::Client(ClientError::CommandFailed { exit_code, .. }) => Some(*exit_code),
            _ => None,
        }
    }

    /// Diagnostic text worth surfacing to the operator
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::StageFailure { diagnostic, .. } => Some(diagnostic),
            Self::ConversionFailure { detail, .. } => detail.as_deref(),
            Self::Client(ClientError::CommandFailed { stderr, .. }) => Some(stderr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_accessors() {
        let err = BuildError::stage_failed(BuildStage::Synthesize, 2, "timing not met");
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.diagnostic(), Some("timing not met"));
        assert_eq!(err.to_string(), "Stage synthesize failed with exit code 2");
    }

    #[test]
    fn test_ambiguity_message() {
        let err = BuildError::ArtifactAmbiguity {
            dir: PathBuf::from("/out"),
            found: 2,
        };
        assert_eq!(err.to_string(), "Expected exactly one artifact in /out, found 2");
        assert_eq!(err.exit_code(), None);
    }
}
