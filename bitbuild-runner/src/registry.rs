//! Hardware registry entry files
//!
//! One file per finished build, named after the build. Operators
//! concatenate the directory to merge new images into their registry.

use bitbuild_core::domain::image::ImageDescriptor;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RegistryWriter {
    dir: PathBuf,
}

impl RegistryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writes the entry for a descriptor, replacing any previous one
    pub async fn write(&self, descriptor: &ImageDescriptor) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&descriptor.name);
        tokio::fs::write(&path, descriptor.registry_entry()).await?;

        info!("Registry entry written to {}", path.display());
        Ok(path)
    }
}
