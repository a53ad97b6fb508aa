use async_trait::async_trait;
use bitbuild_core::domain::host::HostTarget;
use tracing::debug;

use super::BuildHost;
use crate::error::Result;

/// Builds on the machine driving the pipeline; nothing to tear down
#[derive(Debug, Default)]
pub struct LocalBuildHost {}

impl LocalBuildHost {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl BuildHost for LocalBuildHost {
    async fn acquire(&mut self) -> Result<HostTarget> {
        Ok(HostTarget::localhost())
    }

    async fn release(&mut self) -> Result<()> {
        debug!("Local build host released");
        Ok(())
    }

    fn is_local(&self) -> bool {
        true
    }
}
