//! Conversion job poller
//!
//! Queries the image service on a fixed interval until the job leaves
//! `pending`. There is no backoff: every tick is one poll.

use bitbuild_client::ImageConversionClient;
use bitbuild_core::domain::image::ConversionJob;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BuildError, Result};

/// Polls a conversion job until it reaches a terminal state
#[derive(Clone)]
pub struct ConversionPoller {
    client: Arc<dyn ImageConversionClient>,
    interval: Duration,
    max_attempts: Option<u32>,
    timeout: Option<Duration>,
    max_consecutive_errors: u32,
}

impl ConversionPoller {
    /// Creates a poller with a 10 second interval and no ceiling
    pub fn new(client: Arc<dyn ImageConversionClient>) -> Self {
        Self {
            client,
            interval: Duration::from_secs(10),
            max_attempts: None,
            timeout: None,
            max_consecutive_errors: 3,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retryable client errors tolerated in a row before polling gives up
    pub fn with_max_consecutive_errors(mut self, errors: u32) -> Self {
        self.max_consecutive_errors = errors;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls until the job is available or failed
    ///
    /// A failed job is returned as `Ok`; deciding what a failed conversion
    /// means is left to the caller. Errors are reserved for the poll itself:
    /// a non-retryable client error, too many retryable ones in a row,
    /// `PollTimeout` when a ceiling is hit, and `Cancelled`.
    pub async fn poll_until_terminal(
        &self,
        mut job: ConversionJob,
        cancel: &CancellationToken,
    ) -> Result<ConversionJob> {
        info!(
            "Waiting for image conversion {} (interval: {:?})",
            job.job_id, self.interval
        );

        let deadline = self.timeout.map(|limit| Instant::now() + limit);
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts: u32 = 0;
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(&job, attempts)),
                _ = expiry(deadline) => return Err(timed_out(&job, attempts)),
                _ = ticker.tick() => {}
            }

            attempts += 1;

            // A hung poll must not outlive cancellation or the deadline
            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(&job, attempts)),
                _ = expiry(deadline) => return Err(timed_out(&job, attempts)),
                polled = self.client.poll(&job.job_id) => polled,
            };

            match polled {
                Ok(response) => {
                    consecutive_errors = 0;
                    job.apply(response.status, response.detail);
                    info!("Image {} current state: {}", job.job_id, job.status);

                    if job.status.is_terminal() {
                        return Ok(job);
                    }
                }
                Err(e) if e.is_retryable() && consecutive_errors < self.max_consecutive_errors => {
                    consecutive_errors += 1;
                    warn!(
                        "Transient error polling {} ({}/{}): {}",
                        job.job_id, consecutive_errors, self.max_consecutive_errors, e
                    );
                }
                Err(e) => return Err(e.into()),
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(timed_out(&job, attempts));
            }

            debug!("Image {} still pending after {} polls", job.job_id, attempts);
        }
    }

    /// Runs `poll_until_terminal` as its own task
    pub fn spawn(&self, job: ConversionJob, cancel: CancellationToken) -> PollTask {
        let poller = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { poller.poll_until_terminal(job, &token).await });

        PollTask { handle, cancel }
    }
}

/// Resolves at `deadline`, or never without one
async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn cancelled(job: &ConversionJob, attempts: u32) -> BuildError {
    warn!("Polling of {} cancelled after {} attempts", job.job_id, attempts);
    BuildError::Cancelled
}

fn timed_out(job: &ConversionJob, attempts: u32) -> BuildError {
    warn!("Gave up on image {} after {} polls", job.job_id, attempts);
    BuildError::PollTimeout {
        job_id: job.job_id.clone(),
        attempts,
    }
}

/// A polling task that can be cancelled from outside
pub struct PollTask {
    handle: JoinHandle<Result<ConversionJob>>,
    cancel: CancellationToken,
}

impl PollTask {
    /// Asks the task to stop at its next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the task to finish
    pub async fn join(self) -> Result<ConversionJob> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(BuildError::Cancelled),
        }
    }
}
