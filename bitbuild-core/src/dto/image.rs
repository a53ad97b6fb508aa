//! Image conversion DTOs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::image::{ConversionStatus, StagingLocation};

/// Everything a conversion client needs to stage and submit an artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitImageRequest {
    /// Local path of the packaged tarball
    pub artifact_path: PathBuf,
    /// Disambiguated name the artifact is staged under
    pub staged_name: String,
    pub destination: StagingLocation,
    /// Image name
    pub name: String,
    /// Serialized provenance tags
    pub description: String,
}

impl SubmitImageRequest {
    /// Object key the artifact is staged at
    pub fn staged_key(&self) -> String {
        self.destination.key(&self.staged_name)
    }
}

/// Identifiers returned when an image request is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedImage {
    pub job_id: String,
    pub image_id: String,
}

/// Current state of a conversion job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageStatusResponse {
    pub status: ConversionStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Body of an HTTP image creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateImageRequest {
    pub bucket: String,
    pub key: String,
    pub name: String,
    pub description: String,
}

impl From<&SubmitImageRequest> for CreateImageRequest {
    fn from(req: &SubmitImageRequest) -> Self {
        Self {
            bucket: req.destination.bucket.clone(),
            key: req.staged_key(),
            name: req.name.clone(),
            description: req.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_response_deserializes_lowercase() {
        let resp: ImageStatusResponse =
            serde_json::from_str(r#"{"status":"available","detail":"ok"}"#).unwrap();
        assert_eq!(resp.status, ConversionStatus::Available);
        assert_eq!(resp.detail.as_deref(), Some("ok"));

        let resp: ImageStatusResponse = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(resp.status, ConversionStatus::Pending);
        assert!(resp.detail.is_none());
    }

    #[test]
    fn test_create_request_from_submit() {
        let req = SubmitImageRequest {
            artifact_path: PathBuf::from("/tmp/design.tar"),
            staged_name: "design.tar-host-ABC.tar".to_string(),
            destination: StagingLocation::new("bucket"),
            name: "rocket".to_string(),
            description: "d".to_string(),
        };
        let create = CreateImageRequest::from(&req);
        assert_eq!(create.bucket, "bucket");
        assert_eq!(create.key, "dcp/design.tar-host-ABC.tar");
        assert_eq!(create.name, "rocket");
    }
}
