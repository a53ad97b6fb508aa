//! Hand-written doubles for the runner's collaborator traits

use async_trait::async_trait;
use bitbuild_client::{ClientError, ImageConversionClient};
use bitbuild_core::domain::host::HostTarget;
use bitbuild_core::domain::image::{ConversionJob, ConversionStatus};
use bitbuild_core::dto::image::{ImageStatusResponse, SubmitImageRequest, SubmittedImage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::context::ExecContext;
use crate::error::{BuildError, Result};
use crate::executor::{CommandOutput, RemoteExecutor, SyncSpec};
use crate::host::BuildHost;
use crate::notify::Notifier;

fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Executor that records every call and answers from scripted rules
///
/// Rules match when the command contains their pattern; the first match
/// wins. Unmatched commands succeed with empty output. Syncs always succeed.
#[derive(Default)]
pub(crate) struct MockExecutor {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    panics: Mutex<Vec<String>>,
    commands: Mutex<Vec<(String, String)>>,
    syncs: Mutex<Vec<SyncSpec>>,
}

impl MockExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_on(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.rules.lock().unwrap().push((
            pattern.to_string(),
            CommandOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        ));
    }

    pub(crate) fn respond(&self, pattern: &str, stdout: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), ok_output(stdout)));
    }

    /// Panics on any command containing `pattern`, after recording it
    pub(crate) fn panic_on(&self, pattern: &str) {
        self.panics.lock().unwrap().push(pattern.to_string());
    }

    /// `(host address, command)` pairs in call order
    pub(crate) fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn syncs(&self) -> Vec<SyncSpec> {
        self.syncs.lock().unwrap().clone()
    }

    pub(crate) fn ran(&self, pattern: &str) -> bool {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .any(|(_, cmd)| cmd.contains(pattern))
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, ctx: &ExecContext, command: &str) -> Result<CommandOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((ctx.host.address.clone(), command.to_string()));

        let panics = self
            .panics
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| command.contains(pattern.as_str()));
        if panics {
            panic!("executor blew up on `{}`", command);
        }

        let rules = self.rules.lock().unwrap();
        let output = rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ok_output(""));
        Ok(output)
    }

    async fn sync(&self, _ctx: &ExecContext, spec: &SyncSpec) -> Result<CommandOutput> {
        self.syncs.lock().unwrap().push(spec.clone());
        Ok(ok_output(""))
    }
}

/// Conversion client answering polls from a queue
///
/// An empty queue answers `pending`, so a job nobody scripted never
/// finishes on its own.
pub(crate) struct MockConversionClient {
    submitted_image: SubmittedImage,
    responses: Mutex<VecDeque<std::result::Result<ImageStatusResponse, ClientError>>>,
    submitted: Mutex<Vec<SubmitImageRequest>>,
    polls: AtomicUsize,
    distributions: AtomicUsize,
    distribution_fails: Mutex<bool>,
    hangs: AtomicBool,
}

impl MockConversionClient {
    pub(crate) fn new() -> Self {
        Self::with_ids("afi-0f1e2d3c", "agfi-123")
    }

    pub(crate) fn with_ids(job_id: &str, image_id: &str) -> Self {
        Self {
            submitted_image: SubmittedImage {
                job_id: job_id.to_string(),
                image_id: image_id.to_string(),
            },
            responses: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            distributions: AtomicUsize::new(0),
            distribution_fails: Mutex::new(false),
            hangs: AtomicBool::new(false),
        }
    }

    pub(crate) fn push_status(&self, status: ConversionStatus) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ImageStatusResponse {
                status,
                detail: None,
            }));
    }

    pub(crate) fn push_status_with_detail(&self, status: ConversionStatus, detail: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ImageStatusResponse {
                status,
                detail: Some(detail.to_string()),
            }));
    }

    pub(crate) fn push_error(&self, error: ClientError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn fail_distribution(&self) {
        *self.distribution_fails.lock().unwrap() = true;
    }

    /// Makes every later poll wait forever
    pub(crate) fn hang_polls(&self) {
        self.hangs.store(true, Ordering::SeqCst);
    }

    pub(crate) fn submitted(&self) -> Vec<SubmitImageRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub(crate) fn distribute_count(&self) -> usize {
        self.distributions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageConversionClient for MockConversionClient {
    async fn submit(&self, request: &SubmitImageRequest) -> bitbuild_client::Result<SubmittedImage> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(self.submitted_image.clone())
    }

    async fn poll(&self, _job_id: &str) -> bitbuild_client::Result<ImageStatusResponse> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ImageStatusResponse {
                status: ConversionStatus::Pending,
                detail: None,
            }))
    }

    async fn distribute(&self, _job: &ConversionJob) -> bitbuild_client::Result<()> {
        self.distributions.fetch_add(1, Ordering::SeqCst);
        if *self.distribution_fails.lock().unwrap() {
            return Err(ClientError::CommandFailed {
                command: "aws ec2 copy-fpga-image".to_string(),
                exit_code: 255,
                stderr: "UnauthorizedOperation".to_string(),
            });
        }
        Ok(())
    }
}

/// Notifier that keeps every `(title, body)` it is given
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn notifications(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

/// Local host double that counts lifecycle calls
pub(crate) struct CountingHost {
    acquires: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    unavailable: bool,
}

impl CountingHost {
    pub(crate) fn new() -> Self {
        Self {
            acquires: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
            unavailable: false,
        }
    }

    /// A host whose acquisition always fails
    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    pub(crate) fn acquires(&self) -> Arc<AtomicUsize> {
        self.acquires.clone()
    }

    pub(crate) fn releases(&self) -> Arc<AtomicUsize> {
        self.releases.clone()
    }
}

#[async_trait]
impl BuildHost for CountingHost {
    async fn acquire(&mut self) -> Result<HostTarget> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(BuildError::unavailable("localhost", "no capacity"));
        }
        Ok(HostTarget::localhost())
    }

    async fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_local(&self) -> bool {
        true
    }
}
