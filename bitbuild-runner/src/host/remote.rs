use async_trait::async_trait;
use bitbuild_core::domain::host::HostTarget;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::BuildHost;
use super::lease::{HostLease, LeaseLedger};
use crate::context::{ExecContext, shell_quote};
use crate::error::{BuildError, Result};
use crate::executor::RemoteExecutor;

/// Builds on a remote machine reached over ssh
///
/// On release the optional teardown command runs locally with the host
/// address as its last argument, returning the machine to its pool.
pub struct RemoteBuildHost {
    job_id: Uuid,
    address: String,
    executor: Arc<dyn RemoteExecutor>,
    teardown_command: Option<String>,
    leases: Option<LeaseLedger>,
    lease_ttl: Duration,
}

impl RemoteBuildHost {
    pub fn new(job_id: Uuid, address: impl Into<String>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            job_id,
            address: address.into(),
            executor,
            teardown_command: None,
            leases: None,
            lease_ttl: Duration::from_secs(24 * 3600),
        }
    }

    pub fn with_teardown_command(mut self, command: impl Into<String>) -> Self {
        self.teardown_command = Some(command.into());
        self
    }

    pub fn with_leases(mut self, ledger: LeaseLedger) -> Self {
        self.leases = Some(ledger);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    async fn teardown(&self) -> Result<()> {
        let Some(command) = &self.teardown_command else {
            return Ok(());
        };

        info!("Tearing down build host {}", self.address);
        let ctx = ExecContext::new(HostTarget::localhost());
        let output = self
            .executor
            .execute(
                &ctx,
                &format!("{} {}", command, shell_quote(&self.address)),
            )
            .await?;

        if !output.success() {
            return Err(BuildError::Executor {
                host: self.address.clone(),
                reason: format!(
                    "teardown exited with {}: {}",
                    output.exit_code,
                    output.diagnostic()
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl BuildHost for RemoteBuildHost {
    async fn acquire(&mut self) -> Result<HostTarget> {
        let target = HostTarget::remote(self.address.clone());
        let ctx = ExecContext::new(target.clone());

        let output = self
            .executor
            .execute(&ctx, "true")
            .await
            .map_err(|e| BuildError::unavailable(&self.address, e.to_string()))?;

        if !output.success() {
            return Err(BuildError::unavailable(
                &self.address,
                format!(
                    "probe exited with {}: {}",
                    output.exit_code,
                    output.diagnostic()
                ),
            ));
        }

        if let Some(ledger) = &self.leases {
            let lease = HostLease::new(self.job_id, self.address.clone(), self.lease_ttl);
            if let Err(e) = ledger.record(&lease).await {
                warn!("Failed to record lease for {}: {}", self.address, e);
            }
        }

        info!("Build host {} acquired", self.address);
        Ok(target)
    }

    async fn release(&mut self) -> Result<()> {
        self.teardown().await?;

        // A failed teardown keeps the lease so a supervisor can reclaim the host
        if let Some(ledger) = &self.leases {
            ledger.remove(self.job_id).await?;
        }

        info!("Build host {} released", self.address);
        Ok(())
    }

    fn is_local(&self) -> bool {
        false
    }
}
