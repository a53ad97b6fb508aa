//! Execution contexts for build jobs
//!
//! - `ExecContext` travels with every executor call and carries the target
//!   host, environment variables and working directory
//! - `BuildContext` collects the progress records of one build

use bitbuild_core::domain::build::BuildStage;
use bitbuild_core::domain::host::HostTarget;
use bitbuild_core::domain::log::{LogEntry, LogLevel};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where and how a command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    pub host: HostTarget,
    /// Variables exported before the command
    pub env: BTreeMap<String, String>,
    /// Directory the command starts in
    pub workdir: Option<PathBuf>,
}

impl ExecContext {
    pub fn new(host: HostTarget) -> Self {
        Self {
            host,
            env: BTreeMap::new(),
            workdir: None,
        }
    }

    /// Creates a context that re-exports the named variables from this process
    ///
    /// Unset variables are exported as empty strings so the remote side sees
    /// the same shape of environment.
    pub fn forwarding(host: HostTarget, keys: &[String]) -> Self {
        let env = keys
            .iter()
            .map(|key| (key.clone(), std::env::var(key).unwrap_or_default()))
            .collect();

        Self {
            host,
            env,
            workdir: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Same host and environment, different working directory
    pub fn in_dir(&self, dir: impl AsRef<Path>) -> Self {
        Self {
            host: self.host.clone(),
            env: self.env.clone(),
            workdir: Some(dir.as_ref().to_path_buf()),
        }
    }

    /// Same environment and working directory, different host
    pub fn on_host(&self, host: HostTarget) -> Self {
        Self {
            host,
            env: self.env.clone(),
            workdir: self.workdir.clone(),
        }
    }

    /// Renders the shell script executed for `command`
    ///
    /// `cd <workdir> && export K='v' && ... && <command>`
    pub fn render_script(&self, command: &str) -> String {
        let mut parts = Vec::new();

        if let Some(dir) = &self.workdir {
            parts.push(format!("cd {}", shell_quote(&dir.to_string_lossy())));
        }

        for (key, value) in &self.env {
            parts.push(format!("export {}={}", key, shell_quote(value)));
        }

        parts.push(command.to_string());
        parts.join(" && ")
    }
}

/// Quotes a string for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Progress records for one build
pub struct BuildContext {
    job_id: Uuid,
    log_buffer: Mutex<Vec<LogEntry>>,
}

impl BuildContext {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Records a message and mirrors it to the tracing subscriber
    pub fn record(&self, level: LogLevel, stage: Option<BuildStage>, message: String) {
        let tag = stage.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        match level {
            LogLevel::Debug => debug!(job_id = %self.job_id, stage = %tag, "{}", message),
            LogLevel::Info => info!(job_id = %self.job_id, stage = %tag, "{}", message),
            LogLevel::Warning => warn!(job_id = %self.job_id, stage = %tag, "{}", message),
            LogLevel::Error => error!(job_id = %self.job_id, stage = %tag, "{}", message),
        }

        let mut buffer = self.log_buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            stage,
            message,
        });
    }

    pub fn log_info(&self, stage: Option<BuildStage>, message: String) {
        self.record(LogLevel::Info, stage, message);
    }

    pub fn log_warning(&self, stage: Option<BuildStage>, message: String) {
        self.record(LogLevel::Warning, stage, message);
    }

    pub fn log_error(&self, stage: Option<BuildStage>, message: String) {
        self.record(LogLevel::Error, stage, message);
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.drain(..).collect()
    }
}
