//! Operator notifications
//!
//! Notifications are fire-and-forget: `notify` has no error path, so a
//! failing sink can never abort or change the outcome of a build.

use async_trait::async_trait;
use bitbuild_core::domain::build::{BuildJob, BuildStage};
use bitbuild_core::domain::image::ImageDescriptor;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::BuildError;

/// Lines of command output kept in a failure notification
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Sink for build notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct TracingNotifier {}

impl TracingNotifier {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, body: &str) {
        info!("{}", title);
        info!("{}", body);
    }
}

/// Publishes notifications to an SNS topic through the `aws` CLI
#[derive(Debug, Clone)]
pub struct SnsNotifier {
    topic_arn: String,
    region: Option<String>,
}

impl SnsNotifier {
    pub fn new(topic_arn: impl Into<String>) -> Self {
        Self {
            topic_arn: topic_arn.into(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn publish_args(&self, title: &str, body: &str) -> Vec<String> {
        let mut args = vec![
            "sns".to_string(),
            "publish".to_string(),
            "--topic-arn".to_string(),
            self.topic_arn.clone(),
            "--subject".to_string(),
            title.to_string(),
            "--message".to_string(),
            body.to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn notify(&self, title: &str, body: &str) {
        info!("{}", title);
        info!("{}", body);

        let output = Command::new("aws")
            .args(self.publish_args(title, body))
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {}
            Ok(out) => warn!(
                "Failed to publish notification to {}: {}",
                self.topic_arn,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => warn!("Failed to run aws sns publish: {}", e),
        }
    }
}

/// Title and body announcing a finished image
pub fn success_message(descriptor: &ImageDescriptor) -> (String, String) {
    let title = "FPGA Build Completed".to_string();
    let body = format!(
        "Your image has been created!\nAdd\n\n{}\nto your hardware registry to use this hardware configuration.",
        descriptor.registry_entry()
    );
    (title, body)
}

/// Title and body describing a failed build
///
/// The body names the failing stage, if one had started, and carries the
/// exit code and the tail of the command output when the error has them.
pub fn failure_message(
    job: &BuildJob,
    stage: Option<BuildStage>,
    error: &BuildError,
) -> (String, String) {
    let title = "FPGA Build Failed".to_string();
    let stage = stage
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none (no stage started)".to_string());

    let mut body = format!(
        "Your FPGA build failed for triplet: {}\nStage: {}\nError: {}",
        job.triplet, stage, error
    );
    if let Some(code) = error.exit_code() {
        body.push_str(&format!("\nExit code: {}", code));
    }
    if let Some(diagnostic) = error.diagnostic().filter(|d| !d.trim().is_empty()) {
        body.push_str("\n\n");
        body.push_str(&tail_lines(diagnostic, DIAGNOSTIC_TAIL_LINES));
    }

    (title, body)
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
