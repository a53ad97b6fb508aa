//! Crash-safe host leases
//!
//! Every acquired remote host is recorded as a JSON file in a lease
//! directory and removed again on release. If the orchestrating process dies
//! mid-build the file survives, and a supervisor can find the orphaned host
//! through `LeaseLedger::expired`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Record of one host held by one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLease {
    pub job_id: Uuid,
    pub host: String,
    /// Process holding the lease
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl HostLease {
    pub fn new(job_id: Uuid, host: impl Into<String>, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            job_id,
            host: host.into(),
            pid: std::process::id(),
            acquired_at,
            expires_at: acquired_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Directory of lease files, one per job
#[derive(Debug, Clone)]
pub struct LeaseLedger {
    dir: PathBuf,
}

impl LeaseLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }

    pub async fn record(&self, lease: &HostLease) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(lease.job_id);
        fs::write(&path, serde_json::to_vec_pretty(lease)?).await?;
        debug!("Recorded lease for {} at {}", lease.host, path.display());
        Ok(())
    }

    /// Removes a job's lease; a missing lease is not an error
    pub async fn remove(&self, job_id: Uuid) -> Result<()> {
        match fs::remove_file(self.path_for(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable leases; unreadable files are skipped with a warning
    pub async fn list(&self) -> Result<Vec<HostLease>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut leases = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            match read_lease(&path).await {
                Ok(lease) => leases.push(lease),
                Err(e) => warn!("Skipping unreadable lease {}: {}", path.display(), e),
            }
        }

        Ok(leases)
    }

    /// Leases past their expiry: hosts a supervisor should reclaim
    pub async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<HostLease>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|lease| lease.is_expired(now))
            .collect())
    }
}

async fn read_lease(path: &Path) -> Result<HostLease> {
    let raw = fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}
