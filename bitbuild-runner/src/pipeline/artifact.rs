//! Packaged artifact discovery

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{BuildError, Result};

/// Extension of the tarball synthesis leaves for image conversion
pub const ARTIFACT_EXTENSION: &str = "tar";

/// A tarball found in the artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    pub size: u64,
}

impl PackagedArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Finds the single tarball in `dir`
///
/// Only direct children count. A missing directory is treated as empty, and
/// anything other than exactly one match is `ArtifactAmbiguity`.
pub async fn find_single_artifact(dir: &Path) -> Result<PackagedArtifact> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BuildError::ArtifactAmbiguity {
                dir: dir.to_path_buf(),
                found: 0,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_tar = path.extension().and_then(|ext| ext.to_str()) == Some(ARTIFACT_EXTENSION);
        if is_tar && entry.file_type().await?.is_file() {
            matches.push(PackagedArtifact {
                size: entry.metadata().await?.len(),
                path,
            });
        }
    }

    debug!("Found {} artifact(s) in {}", matches.len(), dir.display());

    if matches.len() != 1 {
        return Err(BuildError::ArtifactAmbiguity {
            dir: dir.to_path_buf(),
            found: matches.len(),
        });
    }

    Ok(matches.remove(0))
}
