//! HTTP image service client

use async_trait::async_trait;
use bitbuild_core::domain::image::ConversionJob;
use bitbuild_core::dto::image::{
    CreateImageRequest, ImageStatusResponse, SubmitImageRequest, SubmittedImage,
};
use reqwest::{Body, Client, header};
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::ImageConversionClient;
use crate::error::{ClientError, Result};

/// Client for an image service exposing a JSON API
///
/// Endpoints:
/// - `PUT  /api/staging/{bucket}/{key}` uploads the artifact
/// - `POST /api/images` requests creation
/// - `GET  /api/images/{job_id}` reports status
/// - `POST /api/images/{job_id}/distribute` copies to other regions
#[derive(Debug, Clone)]
pub struct HttpConversionClient {
    /// Base URL of the image service (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl HttpConversionClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the image service API
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the image service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Streams the artifact from disk without buffering it
    async fn upload(&self, request: &SubmitImageRequest) -> Result<()> {
        let file = tokio::fs::File::open(&request.artifact_path).await?;
        let size = file.metadata().await?.len();
        let url = format!(
            "{}/api/staging/{}/{}",
            self.base_url,
            request.destination.bucket,
            request.staged_key()
        );

        info!(
            "Uploading {} ({} bytes) to {}",
            request.artifact_path.display(),
            size,
            url
        );

        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl ImageConversionClient for HttpConversionClient {
    async fn submit(&self, request: &SubmitImageRequest) -> Result<SubmittedImage> {
        if request.staged_name.is_empty() {
            return Err(ClientError::InvalidRequest(
                "staged artifact name is empty".to_string(),
            ));
        }

        self.upload(request).await?;

        let url = format!("{}/api/images", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateImageRequest::from(request))
            .send()
            .await?;

        let submitted: SubmittedImage = self.handle_response(response).await?;
        info!(
            "Image requested: job_id={}, image_id={}",
            submitted.job_id, submitted.image_id
        );
        Ok(submitted)
    }

    async fn poll(&self, job_id: &str) -> Result<ImageStatusResponse> {
        let url = format!("{}/api/images/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        let status: ImageStatusResponse = self.handle_response(response).await?;
        debug!("Image job {} status: {}", job_id, status.status);
        Ok(status)
    }

    async fn distribute(&self, job: &ConversionJob) -> Result<()> {
        let url = format!("{}/api/images/{}/distribute", self.base_url, job.job_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpConversionClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = HttpConversionClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let client = HttpConversionClient::with_client("http://images:9000", Client::new());
        assert_eq!(client.base_url(), "http://images:9000");
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_staged_name() {
        let client = HttpConversionClient::new("http://localhost:1");
        let request = SubmitImageRequest {
            artifact_path: "/nonexistent.tar".into(),
            staged_name: String::new(),
            destination: bitbuild_core::domain::image::StagingLocation::new("bucket"),
            name: "n".to_string(),
            description: "d".to_string(),
        };
        let err = client.submit(&request).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    fn upload_request(artifact_path: std::path::PathBuf) -> SubmitImageRequest {
        SubmitImageRequest {
            artifact_path,
            staged_name: "design.tar-localhost-ABCDEFGHIJ.tar".to_string(),
            destination: bitbuild_core::domain::image::StagingLocation::new("bucket"),
            name: "rocket".to_string(),
            description: "d".to_string(),
        }
    }

    /// Accepts one request and answers 200, returning its headers and body
    async fn accept_one(listener: tokio::net::TcpListener) -> (String, Vec<u8>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            received.extend_from_slice(&chunk[..n]);
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&received[..header_end]).to_ascii_lowercase();
        let length: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|value| value.trim().parse().unwrap())
            .unwrap_or(0);

        while received.len() < header_end + length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();

        (headers, received.split_off(header_end))
    }

    #[tokio::test]
    async fn test_upload_streams_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("design.tar");
        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&artifact, &contents).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one(listener));

        let client = HttpConversionClient::new(format!("http://{}", addr));
        client.upload(&upload_request(artifact)).await.unwrap();

        let (headers, body) = server.await.unwrap();
        assert!(headers.starts_with("put /api/staging/bucket/dcp/design.tar-localhost-abcdefghij.tar"));
        assert!(headers.contains("content-length: 100000"));
        assert_eq!(body, contents);
    }

    #[tokio::test]
    async fn test_upload_missing_artifact() {
        let client = HttpConversionClient::new("http://localhost:1");
        let err = client
            .upload(&upload_request("/nonexistent/design.tar".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
