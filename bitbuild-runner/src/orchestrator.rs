//! Top-level build driver
//!
//! Owns the build job and its host handle for one run. Whatever happens in
//! the pipeline, the host is released exactly once and, unless the run is a
//! bypass, exactly one notification goes out. Both the success and the
//! failure notification are sent from here, after the pipeline task has
//! finished, so nothing the pipeline does can produce a second one.

use bitbuild_client::ImageConversionClient;
use bitbuild_core::domain::build::{BuildJob, BuildStage};
use bitbuild_core::domain::host::HostTarget;
use bitbuild_core::domain::image::ImageDescriptor;
use bitbuild_core::domain::log::LogEntry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::{BuildContext, ExecContext};
use crate::error::BuildError;
use crate::executor::RemoteExecutor;
use crate::host::BuildHostHandle;
use crate::hook::run_post_build_hook;
use crate::notify::{Notifier, failure_message, success_message};
use crate::pipeline::{BuildLayout, PipelineFailure, PipelineServices, StagePipeline};

/// Result of one orchestrated run
#[derive(Debug)]
pub enum BuildOutcome {
    Succeeded {
        descriptor: ImageDescriptor,
        logs: Vec<LogEntry>,
    },
    Failed {
        /// Stage that failed; `None` when no stage was running, as when the
        /// host could not be acquired or the pipeline task panicked
        stage: Option<BuildStage>,
        error: BuildError,
        logs: Vec<LogEntry>,
    },
    /// Release-only fast path
    Bypassed,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded { .. })
    }
}

pub struct BuildOrchestrator {
    job: BuildJob,
    host: BuildHostHandle,
    services: PipelineServices,
    notifier: Arc<dyn Notifier>,
    config: Config,
    cancel: CancellationToken,
}

impl BuildOrchestrator {
    pub fn new(
        job: BuildJob,
        host: BuildHostHandle,
        executor: Arc<dyn RemoteExecutor>,
        client: Arc<dyn ImageConversionClient>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            job,
            host,
            services: PipelineServices { executor, client },
            notifier,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token a supervisor can use to stop the run between stages or mid-poll
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the job to completion
    ///
    /// With `bypass` the host is released straight away and nothing else
    /// happens. Never panics out and never leaves the host held.
    pub async fn run(mut self, bypass: bool) -> BuildOutcome {
        if bypass {
            info!("Bypass requested for {}, releasing build host", self.job.name);
            self.host.release().await;
            return BuildOutcome::Bypassed;
        }

        let context = Arc::new(BuildContext::new(self.job.id));
        context.log_info(
            None,
            format!("Building {} for triplet {}", self.job.name, self.job.triplet),
        );

        let target = match self.host.acquire().await {
            Ok(target) => target,
            Err(error) => {
                context.log_error(None, format!("Failed to acquire build host: {}", error));
                return self.fail(None, error, &context).await;
            }
        };

        let layout = BuildLayout::new(
            self.config.deploy_dir.clone(),
            self.config.remote_build_dir.clone(),
            &self.job,
        );
        let results_dir = layout.results_dir();
        let mut pipeline = StagePipeline::new(
            self.job.clone(),
            layout,
            target,
            self.services.clone(),
            self.config.poller(self.services.client.clone()),
            context.clone(),
        )
        .with_forwarded_env(&self.config.forward_env)
        .with_cancellation(self.cancel.clone());

        let handle = tokio::spawn(async move { pipeline.run().await });
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Build pipeline task panicked: {}", e);
                return self
                    .fail(None, BuildError::Fault(e.to_string()), &context)
                    .await;
            }
        };

        match result {
            Ok(descriptor) => {
                self.host.release().await;
                info!("Build {} produced image {}", self.job.name, descriptor.image_id);

                let (title, body) = success_message(&descriptor);
                self.notifier.notify(&title, &body).await;
                self.run_hook(results_dir).await;

                BuildOutcome::Succeeded {
                    descriptor,
                    logs: context.drain_logs(),
                }
            }
            Err(PipelineFailure { stage, error }) => self.fail(stage, error, &context).await,
        }
    }

    /// Runs the post-build hook in its own task
    ///
    /// The build is already announced as complete; whatever the hook does,
    /// including panicking, is only logged.
    async fn run_hook(&self, results_dir: PathBuf) {
        let Some(hook) = self.job.post_build_hook.clone() else {
            return;
        };

        let executor = self.services.executor.clone();
        let ctx = ExecContext::forwarding(HostTarget::localhost(), &self.config.forward_env);
        let task = tokio::spawn(async move {
            run_post_build_hook(executor.as_ref(), &ctx, &hook, &results_dir).await
        });

        if let Err(e) = task.await {
            warn!("Post-build hook task failed: {}", e);
        }
    }

    /// Releases the host and sends the single failure notification
    async fn fail(
        &mut self,
        stage: Option<BuildStage>,
        error: BuildError,
        context: &BuildContext,
    ) -> BuildOutcome {
        self.host.release().await;

        let (title, body) = failure_message(&self.job, stage, &error);
        self.notifier.notify(&title, &body).await;

        error!("Build {} failed: {}", self.job.name, error);
        BuildOutcome::Failed {
            stage,
            error,
            logs: context.drain_logs(),
        }
    }
}
