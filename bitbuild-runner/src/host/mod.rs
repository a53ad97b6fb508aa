//! Build host lifecycle
//!
//! A build host is acquired once per job and released exactly once on every
//! exit path. The variant (local or remote) is picked from the job's
//! `HostSpec` when the handle is created.

mod lease;
mod local;
mod remote;

pub use lease::{HostLease, LeaseLedger};
pub use local::LocalBuildHost;
pub use remote::RemoteBuildHost;

use async_trait::async_trait;
use bitbuild_core::domain::host::{HostSpec, HostTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::executor::RemoteExecutor;

/// A compute resource a build can run on
#[async_trait]
pub trait BuildHost: Send + Sync {
    /// Makes the host usable for this job
    ///
    /// Fails with `BuildError::ResourceUnavailable` when the host cannot be used.
    async fn acquire(&mut self) -> Result<HostTarget>;

    /// Returns the host; safe to call whether or not `acquire` succeeded
    async fn release(&mut self) -> Result<()>;

    /// Whether synthesis runs in place without copying sources
    fn is_local(&self) -> bool;
}

/// Exclusive ownership of one build host for one job
pub struct BuildHostHandle {
    host: Box<dyn BuildHost>,
    target: Option<HostTarget>,
    release_calls: u32,
}

impl BuildHostHandle {
    pub fn new(host: Box<dyn BuildHost>) -> Self {
        Self {
            host,
            target: None,
            release_calls: 0,
        }
    }

    /// Creates the handle variant matching a host spec
    pub fn for_spec(
        spec: &HostSpec,
        job_id: Uuid,
        executor: Arc<dyn RemoteExecutor>,
        leases: Option<LeaseLedger>,
        lease_ttl: Duration,
    ) -> Self {
        match spec {
            HostSpec::Local => Self::new(Box::new(LocalBuildHost::new())),
            HostSpec::Remote {
                address,
                teardown_command,
            } => {
                let mut host = RemoteBuildHost::new(job_id, address.clone(), executor)
                    .with_lease_ttl(lease_ttl);
                if let Some(cmd) = teardown_command {
                    host = host.with_teardown_command(cmd.clone());
                }
                if let Some(ledger) = leases {
                    host = host.with_leases(ledger);
                }
                Self::new(Box::new(host))
            }
        }
    }

    pub async fn acquire(&mut self) -> Result<HostTarget> {
        let target = self.host.acquire().await?;
        debug!("Acquired build host {}", target);
        self.target = Some(target.clone());
        Ok(target)
    }

    /// Releases the host
    ///
    /// Only the first call reaches the underlying host; later calls are no-ops.
    /// Teardown failures are logged, never returned, so callers on failure
    /// paths need no extra handling.
    pub async fn release(&mut self) {
        self.release_calls += 1;
        if self.release_calls > 1 {
            debug!("Build host already released, ignoring");
            return;
        }

        if let Err(e) = self.host.release().await {
            warn!("Failed to release build host: {}", e);
        }
        self.target = None;
    }

    pub fn target(&self) -> Option<&HostTarget> {
        self.target.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.host.is_local()
    }

    /// Number of release calls made on this handle
    pub fn release_calls(&self) -> u32 {
        self.release_calls
    }
}
