//! Image conversion domain types
//!
//! A packaged synthesis tarball is staged to shared storage, converted by an
//! asynchronous remote service, and finally described by an `ImageDescriptor`
//! that operators merge into their hardware registry.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of a single provenance tag
pub const MAX_TAG_LEN: usize = 255;

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 10;

/// Shared staging storage for artifacts awaiting conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingLocation {
    pub bucket: String,
    /// Key prefix for staged artifacts
    pub prefix: String,
}

impl StagingLocation {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: "dcp".to_string(),
        }
    }

    /// Object key for a staged artifact
    pub fn key(&self, staged_name: &str) -> String {
        if self.prefix.is_empty() {
            staged_name.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), staged_name)
        }
    }
}

/// Disambiguates an artifact name for shared staging storage
///
/// Concurrent builds may stage identically named tarballs, so the name is
/// suffixed with the build host identity and a random token.
pub fn staged_artifact_name(file_name: &str, host: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();

    format!("{}-{}-{}.tar", file_name, host, suffix)
}

/// Tag validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("tag '{name}' is {len} characters, limit is 255")]
    TooLong { name: &'static str, len: usize },
}

/// Provenance recorded in the image description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTags {
    pub build_triplet: String,
    pub deploy_triplet: String,
    /// Source tree revision, suffixed with `-dirty` for uncommitted changes
    pub source_commit: String,
}

impl ImageTags {
    /// Creates tags, rejecting any value longer than `MAX_TAG_LEN`
    pub fn new(
        build_triplet: impl Into<String>,
        deploy_triplet: impl Into<String>,
        source_commit: impl Into<String>,
    ) -> Result<Self, TagError> {
        let tags = Self {
            build_triplet: build_triplet.into(),
            deploy_triplet: deploy_triplet.into(),
            source_commit: source_commit.into(),
        };
        tags.validate()?;
        Ok(tags)
    }

    pub fn validate(&self) -> Result<(), TagError> {
        for (name, value) in [
            ("build-triplet", &self.build_triplet),
            ("deploy-triplet", &self.deploy_triplet),
            ("commit", &self.source_commit),
        ] {
            if value.len() > MAX_TAG_LEN {
                return Err(TagError::TooLong {
                    name,
                    len: value.len(),
                });
            }
        }
        Ok(())
    }

    /// Serializes the tags into a single image description
    pub fn to_description(&self) -> String {
        format!(
            "build-triplet:{},deploy-triplet:{},commit:{}",
            self.build_triplet, self.deploy_triplet, self.source_commit
        )
    }
}

/// Status reported by the image conversion service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Available,
    Failed,
}

impl ConversionStatus {
    /// Maps a service state code; anything not pending or available is a failure
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "pending" => ConversionStatus::Pending,
            "available" => ConversionStatus::Available,
            _ => ConversionStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ConversionStatus::Pending)
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStatus::Pending => "pending",
            ConversionStatus::Available => "available",
            ConversionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An in-flight image conversion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Staged artifact key the service converts
    pub staged_artifact: String,
    /// Service-side job identifier used for polling
    pub job_id: String,
    /// Global image identifier, provisional until available
    pub image_id: String,
    pub status: ConversionStatus,
    /// Raw detail from the most recent poll
    pub detail: Option<String>,
    pub last_polled: Option<chrono::DateTime<chrono::Utc>>,
}

impl ConversionJob {
    pub fn new(
        staged_artifact: impl Into<String>,
        job_id: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            staged_artifact: staged_artifact.into(),
            job_id: job_id.into(),
            image_id: image_id.into(),
            status: ConversionStatus::Pending,
            detail: None,
            last_polled: None,
        }
    }

    /// Records a poll response
    ///
    /// Terminal states are sticky: once available or failed, later responses
    /// are ignored.
    pub fn apply(&mut self, status: ConversionStatus, detail: Option<String>) {
        self.last_polled = Some(chrono::Utc::now());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        if detail.is_some() {
            self.detail = detail;
        }
    }
}

/// Final record of a completed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Build name; names the registry entry
    pub name: String,
    pub image_id: String,
    pub job_id: String,
    pub tags: ImageTags,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ImageDescriptor {
    /// Renders the entry an operator merges into the hardware registry
    pub fn registry_entry(&self) -> String {
        let mut entry = format!("{}:\n", self.name);
        entry.push_str(&format!("    agfi: {}\n", self.image_id));
        entry.push_str("    deploy_triplet_override: null\n");
        entry.push_str("    custom_runtime_config: null\n");
        entry
    }
}
