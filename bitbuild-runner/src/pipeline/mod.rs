//! Bitstream build pipeline
//!
//! Sequences the build stages strictly in order:
//! generate-design, build-driver, synthesize, package-artifact,
//! submit-image, poll-image, distribute, notify.
//!
//! Any failing stage stops the pipeline on the spot. The pipeline never
//! releases the build host and never talks to the notifier: the notify stage
//! ends once the registry entry is written, and the orchestrator announces
//! the result and runs the post-build hook.

pub mod artifact;
pub mod layout;

pub use artifact::{PackagedArtifact, find_single_artifact};
pub use layout::BuildLayout;

use bitbuild_client::ImageConversionClient;
use bitbuild_core::domain::build::{BuildJob, BuildStage, StageResult};
use bitbuild_core::domain::host::HostTarget;
use bitbuild_core::domain::image::{
    ConversionJob, ConversionStatus, ImageDescriptor, ImageTags, staged_artifact_name,
};
use bitbuild_core::dto::image::SubmitImageRequest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::context::{BuildContext, ExecContext, shell_quote};
use crate::error::{BuildError, Result};
use crate::executor::{CommandOutput, RemoteExecutor, SyncSpec};
use crate::registry::RegistryWriter;
use crate::scheduler::ConversionPoller;

const MANAGER_ENV_SCRIPT: &str = "sourceme-f1-manager.sh";

/// External collaborators a pipeline drives
#[derive(Clone)]
pub struct PipelineServices {
    pub executor: Arc<dyn RemoteExecutor>,
    pub client: Arc<dyn ImageConversionClient>,
}

/// Where a pipeline is in its stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running(BuildStage),
    Done,
    /// `None` when the run stopped before its first stage
    Failed(Option<BuildStage>),
}

/// The stage a pipeline stopped at, and why
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Option<BuildStage>,
    pub error: BuildError,
}

/// Runs the stages of one build on an acquired host
pub struct StagePipeline {
    job: BuildJob,
    layout: BuildLayout,
    target: ExecContext,
    services: PipelineServices,
    poller: ConversionPoller,
    registry: RegistryWriter,
    context: Arc<BuildContext>,
    cancel: CancellationToken,
    state: PipelineState,
    history: Vec<BuildStage>,
}

impl StagePipeline {
    pub fn new(
        job: BuildJob,
        layout: BuildLayout,
        target: HostTarget,
        services: PipelineServices,
        poller: ConversionPoller,
        context: Arc<BuildContext>,
    ) -> Self {
        let registry = RegistryWriter::new(layout.registry_dir());
        Self {
            job,
            layout,
            target: ExecContext::new(target),
            services,
            poller,
            registry,
            context,
            cancel: CancellationToken::new(),
            state: PipelineState::NotStarted,
            history: Vec::new(),
        }
    }

    /// Exports the named variables from this process to every stage command
    pub fn with_forwarded_env(mut self, keys: &[String]) -> Self {
        let host = self.target.host.clone();
        self.target = ExecContext::forwarding(host, keys);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Stages entered so far, in order
    pub fn history(&self) -> &[BuildStage] {
        &self.history
    }

    /// Runs every stage and returns the registered image
    pub async fn run(&mut self) -> std::result::Result<ImageDescriptor, PipelineFailure> {
        match self.run_stages().await {
            Ok(descriptor) => {
                self.state = PipelineState::Done;
                self.context.log_info(
                    None,
                    format!("Build complete, image {} ready", descriptor.image_id),
                );
                Ok(descriptor)
            }
            Err(error) => {
                let stage = match self.state {
                    PipelineState::Running(stage) => Some(stage),
                    _ => None,
                };
                self.state = PipelineState::Failed(stage);
                match stage {
                    Some(stage) => self
                        .context
                        .log_error(Some(stage), format!("Stage {} failed: {}", stage, error)),
                    None => self
                        .context
                        .log_error(None, format!("Build stopped before any stage: {}", error)),
                }
                Err(PipelineFailure { stage, error })
            }
        }
    }

    async fn run_stages(&mut self) -> Result<ImageDescriptor> {
        self.begin(BuildStage::GenerateDesign)?;
        self.generate_design().await?;

        self.begin(BuildStage::BuildDriver)?;
        self.build_driver().await?;

        self.begin(BuildStage::Synthesize)?;
        self.synthesize().await?;

        self.begin(BuildStage::PackageArtifact)?;
        let artifact = self.package_artifact().await?;

        self.begin(BuildStage::SubmitImage)?;
        let (conversion, tags) = self.submit_image(&artifact).await?;

        self.begin(BuildStage::PollImage)?;
        let conversion = self.poll_image(conversion).await?;

        self.begin(BuildStage::Distribute)?;
        self.distribute(&conversion).await;

        self.begin(BuildStage::Notify)?;
        self.register(conversion, tags).await
    }

    fn begin(&mut self, stage: BuildStage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        self.state = PipelineState::Running(stage);
        self.history.push(stage);
        self.context
            .log_info(Some(stage), format!("Starting stage {}", stage));
        Ok(())
    }

    fn local(&self) -> ExecContext {
        self.target.on_host(HostTarget::localhost())
    }

    /// Runs a command and turns a non-zero exit into a stage failure
    async fn run_checked(
        &self,
        stage: BuildStage,
        ctx: &ExecContext,
        command: &str,
    ) -> Result<CommandOutput> {
        let output = self.services.executor.execute(ctx, command).await?;
        checked(stage, output)
    }

    async fn sync_checked(
        &self,
        stage: BuildStage,
        ctx: &ExecContext,
        spec: &SyncSpec,
    ) -> Result<()> {
        let output = self.services.executor.sync(ctx, spec).await?;
        checked(stage, output).map(|_| ())
    }

    /// Runs a make target from the simulation directory
    async fn make_target(&self, stage: BuildStage, target: &str) -> Result<()> {
        let ctx = self.local().in_dir(self.layout.source_root());
        let command = format!(
            "source {} && cd sim/ && {}",
            MANAGER_ENV_SCRIPT,
            self.job.triplet.make_recipe(target)
        );
        self.run_checked(stage, &ctx, &command).await?;
        Ok(())
    }

    async fn generate_design(&self) -> Result<()> {
        self.make_target(BuildStage::GenerateDesign, "PLATFORM=f1 replace-rtl")
            .await
    }

    async fn build_driver(&self) -> Result<()> {
        self.make_target(BuildStage::BuildDriver, "PLATFORM=f1 driver")
            .await
    }

    /// Copies the developer kit and the custom logic directory to a remote host
    async fn remote_setup(&self) -> Result<String> {
        let stage = BuildStage::Synthesize;
        let platform_dir = self.layout.remote_platform_dir();

        let mkdir = format!("mkdir -p {}", shell_quote(&platform_dir));
        self.run_checked(stage, &self.target, &mkdir).await?;

        // Checkpoints from earlier local builds stay behind
        let kit = SyncSpec::upload(self.layout.platform_dir(), platform_dir)
            .exclude("hdk/cl/developer_designs/cl_*");
        self.sync_checked(stage, &self.target, &kit).await?;

        let cl_dir = self.layout.remote_cl_dir();
        let design = SyncSpec::upload(
            format!("{}/", self.layout.local_cl_dir().display()),
            cl_dir.clone(),
        )
        .exclude("build/checkpoints");
        self.sync_checked(stage, &self.target, &design).await?;

        Ok(cl_dir)
    }

    async fn synthesize(&self) -> Result<()> {
        let stage = BuildStage::Synthesize;
        let results = self.layout.results_dir();

        let keep_rtl = format!(
            "mkdir -p {} && cp {} {}",
            shell_quote(&results.to_string_lossy()),
            shell_quote(&self.layout.generated_rtl().to_string_lossy()),
            shell_quote(&results.join(layout::GENERATED_RTL).to_string_lossy()),
        );
        self.run_checked(stage, &self.local(), &keep_rtl).await?;

        let cl_dir = if self.target.host.local {
            self.layout.cl_dir_for(true)
        } else {
            self.remote_setup().await?
        };

        let script = SyncSpec::upload(self.layout.build_script(), format!("{}/", cl_dir));
        self.sync_checked(stage, &self.target, &script).await?;

        self.context
            .log_info(Some(stage), format!("Building bitstream in {}", cl_dir));
        let build = self
            .services
            .executor
            .execute(
                &self.target,
                &format!(
                    "{}/build-bitstream.sh {}",
                    shell_quote(&cl_dir),
                    shell_quote(&cl_dir)
                ),
            )
            .await?;

        // Results come back even from a failed build for postmortem
        let collect = SyncSpec::download(cl_dir, format!("{}/", results.display()));
        let collected = self.services.executor.sync(&self.target, &collect).await;

        checked(stage, build)?;
        checked(stage, collected?)?;
        Ok(())
    }

    async fn package_artifact(&self) -> Result<PackagedArtifact> {
        let artifact = find_single_artifact(&self.layout.artifact_dir()).await?;
        self.context.log_info(
            Some(BuildStage::PackageArtifact),
            format!("Packaged artifact {} ({} bytes)", artifact.path.display(), artifact.size),
        );
        Ok(artifact)
    }

    /// Source tree revision, suffixed with `-dirty` for uncommitted changes
    async fn source_commit(&self) -> Result<String> {
        let stage = BuildStage::SubmitImage;
        let ctx = self.local().in_dir(self.layout.source_root());

        let head = self.run_checked(stage, &ctx, "git rev-parse HEAD").await?;
        let status = self.run_checked(stage, &ctx, "git status --porcelain").await?;

        let mut commit = head.stdout.trim().to_string();
        if !status.stdout.trim().is_empty() {
            commit.push_str("-dirty");
        }
        Ok(commit)
    }

    async fn submit_image(
        &self,
        artifact: &PackagedArtifact,
    ) -> Result<(ConversionJob, ImageTags)> {
        let tags = ImageTags::new(
            self.job.triplet.to_string(),
            self.job.deploy_triplet(),
            self.source_commit().await?,
        )?;

        let request = SubmitImageRequest {
            artifact_path: artifact.path.clone(),
            staged_name: staged_artifact_name(&artifact.file_name(), &self.target.host.address),
            destination: self.job.staging.clone(),
            name: self.job.name.clone(),
            description: tags.to_description(),
        };

        let submitted = self.services.client.submit(&request).await?;
        self.context.log_info(
            Some(BuildStage::SubmitImage),
            format!(
                "Submitted {} as job {}, image {}",
                request.staged_key(),
                submitted.job_id,
                submitted.image_id
            ),
        );

        let conversion =
            ConversionJob::new(request.staged_key(), submitted.job_id, submitted.image_id);
        Ok((conversion, tags))
    }

    async fn poll_image(&self, conversion: ConversionJob) -> Result<ConversionJob> {
        let task = self.poller.spawn(conversion, self.cancel.child_token());
        let conversion = task.join().await?;

        if let Some(detail) = &conversion.detail {
            self.write_image_info(detail).await;
        }

        if conversion.status != ConversionStatus::Available {
            return Err(BuildError::ConversionFailure {
                job_id: conversion.job_id.clone(),
                status: conversion.status,
                detail: conversion.detail.clone(),
            });
        }

        self.context.log_info(
            Some(BuildStage::PollImage),
            format!("Image {} is available", conversion.image_id),
        );
        Ok(conversion)
    }

    async fn write_image_info(&self, detail: &str) {
        let path = self.layout.image_info_file();
        let written = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, detail).await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    /// Best-effort: a failed copy leaves the build successful
    async fn distribute(&self, conversion: &ConversionJob) {
        if let Err(e) = self.services.client.distribute(conversion).await {
            self.context.log_warning(
                Some(BuildStage::Distribute),
                format!("Failed to distribute image {}: {}", conversion.image_id, e),
            );
        }
    }

    /// Writes the registry entry; the success announcement follows it
    async fn register(&self, conversion: ConversionJob, tags: ImageTags) -> Result<ImageDescriptor> {
        let descriptor = ImageDescriptor {
            name: self.job.name.clone(),
            image_id: conversion.image_id,
            job_id: conversion.job_id,
            tags,
            created_at: chrono::Utc::now(),
        };

        let entry = self.registry.write(&descriptor).await?;
        self.context.log_info(
            Some(BuildStage::Notify),
            format!("Registry entry ready at {}", entry.display()),
        );
        Ok(descriptor)
    }
}

/// Turns a non-zero exit into a failure of `stage`
fn checked(stage: BuildStage, output: CommandOutput) -> Result<CommandOutput> {
    match output.stage_result() {
        StageResult::Success => Ok(output),
        StageResult::Failure {
            exit_code,
            diagnostic,
        } => Err(BuildError::stage_failed(stage, exit_code, diagnostic)),
    }
}
