//! Command execution on build hosts
//!
//! Handles running pipeline commands and bulk file copies:
//! - Local targets run through `bash -c`
//! - Remote targets run through `ssh <host> bash -c '<script>'`
//! - Directory synchronization goes through `rsync`, over ssh for remote targets

use async_trait::async_trait;
use bitbuild_core::domain::build::StageResult;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use crate::context::{ExecContext, shell_quote};
use crate::error::{BuildError, Result};

const SSH_OPTIONS: &[&str] = &["-o", "StrictHostKeyChecking=no"];

/// Captured result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output for postmortem, stderr last
    pub fn diagnostic(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }

    pub fn stage_result(&self) -> StageResult {
        StageResult::from_exit(self.exit_code, self.diagnostic())
    }
}

/// Direction of a bulk copy, relative to the local machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Upload,
    Download,
}

/// A bulk directory copy between the local machine and a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSpec {
    pub local: PathBuf,
    pub remote: String,
    pub direction: SyncDirection,
    pub excludes: Vec<String>,
}

impl SyncSpec {
    pub fn upload(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            direction: SyncDirection::Upload,
            excludes: Vec::new(),
        }
    }

    pub fn download(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            direction: SyncDirection::Download,
            excludes: Vec::new(),
        }
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }
}

/// Runs commands and copies on the host named by an `ExecContext`
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Executes a shell command
    ///
    /// A non-zero exit is reported in the output, not as an error. Errors
    /// mean the command could not be run at all.
    async fn execute(&self, ctx: &ExecContext, command: &str) -> Result<CommandOutput>;

    /// Copies a directory tree in the direction given by the spec
    async fn sync(&self, ctx: &ExecContext, spec: &SyncSpec) -> Result<CommandOutput>;
}

/// Executor backed by bash, ssh and rsync
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {}
    }

    fn shell_command(ctx: &ExecContext, command: &str) -> Command {
        let script = ctx.render_script(command);

        if ctx.host.local {
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(SSH_OPTIONS)
                .arg(&ctx.host.address)
                .arg(format!("bash -c {}", shell_quote(&script)));
            cmd
        }
    }

    /// Arguments for the rsync invocation of a spec
    pub fn rsync_args(ctx: &ExecContext, spec: &SyncSpec) -> Vec<String> {
        let mut args = vec!["-a".to_string(), "-l".to_string()];

        for pattern in &spec.excludes {
            args.push(format!("--exclude={}", pattern));
        }

        let remote = if ctx.host.local {
            spec.remote.clone()
        } else {
            args.push("-e".to_string());
            args.push(format!("ssh {}", SSH_OPTIONS.join(" ")));
            format!("{}:{}", ctx.host.address, spec.remote)
        };

        let local = spec.local.to_string_lossy().to_string();
        match spec.direction {
            SyncDirection::Upload => {
                args.push(local);
                args.push(remote);
            }
            SyncDirection::Download => {
                args.push(remote);
                args.push(local);
            }
        }

        args
    }

    async fn run(ctx: &ExecContext, mut command: Command, label: &str) -> Result<CommandOutput> {
        let output = command.output().await.map_err(|e| BuildError::Executor {
            host: ctx.host.address.clone(),
            reason: format!("{}: {}", label, e),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !stdout.trim().is_empty() {
            debug!("[{}] {} stdout: {}", ctx.host, label, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("[{}] {} stderr: {}", ctx.host, label, stderr.trim());
        }
        debug!("[{}] {} exited with {}", ctx.host, label, exit_code);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn execute(&self, ctx: &ExecContext, command: &str) -> Result<CommandOutput> {
        debug!("[{}] run: {}", ctx.host, command);
        Self::run(ctx, Self::shell_command(ctx, command), command).await
    }

    async fn sync(&self, ctx: &ExecContext, spec: &SyncSpec) -> Result<CommandOutput> {
        let args = Self::rsync_args(ctx, spec);
        debug!("[{}] rsync {}", ctx.host, args.join(" "));

        let mut command = Command::new("rsync");
        command.args(&args);
        Self::run(ctx, command, "rsync").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitbuild_core::domain::host::HostTarget;

    #[test]
    fn test_rsync_args_remote_upload() {
        let ctx = ExecContext::new(HostTarget::remote("10.0.0.7"));
        let spec = SyncSpec::upload("/local/aws-fpga", "/build/platforms/f1/")
            .exclude("hdk/cl/developer_designs/cl_*");

        assert_eq!(
            ShellExecutor::rsync_args(&ctx, &spec),
            vec![
                "-a",
                "-l",
                "--exclude=hdk/cl/developer_designs/cl_*",
                "-e",
                "ssh -o StrictHostKeyChecking=no",
                "/local/aws-fpga",
                "10.0.0.7:/build/platforms/f1/",
            ]
        );
    }

    #[test]
    fn test_rsync_args_local_download() {
        let ctx = ExecContext::new(HostTarget::localhost());
        let spec = SyncSpec::download("/build/cl_x", "/results/");

        assert_eq!(
            ShellExecutor::rsync_args(&ctx, &spec),
            vec!["-a", "-l", "/build/cl_x", "/results/"]
        );
    }

    #[test]
    fn test_diagnostic_combines_streams() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "building\n".to_string(),
            stderr: "error: timing\n".to_string(),
        };
        assert_eq!(out.diagnostic(), "building\nerror: timing");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_local_execute_reports_exit_code() {
        let executor = ShellExecutor::new();
        let ctx = ExecContext::new(HostTarget::localhost()).with_env("GREETING", "hi there");

        let output = executor
            .execute(&ctx, "echo \"$GREETING\"; exit 3")
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hi there");
    }

    #[tokio::test]
    async fn test_local_execute_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new();
        let ctx = ExecContext::new(HostTarget::localhost()).in_dir(dir.path());

        let output = executor.execute(&ctx, "touch marker").await.unwrap();
        assert!(output.success());
        assert!(dir.path().join("marker").exists());
    }
}
