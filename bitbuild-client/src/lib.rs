//! Bitbuild image conversion client
//!
//! Clients that hand a packaged synthesis tarball to an asynchronous image
//! build service and track the resulting conversion job.
//!
//! Two implementations share the `ImageConversionClient` trait:
//! - `HttpConversionClient` talks to an image service over a JSON API
//! - `AwsCliConversionClient` drives S3 and EC2 FPGA images through the `aws` CLI
//!
//! # Example
//!
//! ```no_run
//! use bitbuild_client::{HttpConversionClient, ImageConversionClient};
//!
//! # async fn example() -> bitbuild_client::Result<()> {
//! let client = HttpConversionClient::new("http://localhost:8080");
//! let status = client.poll("afi-0123").await?;
//! println!("status: {}", status.status);
//! # Ok(())
//! # }
//! ```

pub mod aws;
pub mod error;
pub mod http;

pub use aws::AwsCliConversionClient;
pub use error::{ClientError, Result};
pub use http::HttpConversionClient;

use async_trait::async_trait;
use bitbuild_core::domain::image::ConversionJob;
use bitbuild_core::dto::image::{ImageStatusResponse, SubmitImageRequest, SubmittedImage};

/// Client for an asynchronous image conversion service
#[async_trait]
pub trait ImageConversionClient: Send + Sync {
    /// Uploads the artifact to staging and requests image creation
    ///
    /// # Returns
    /// The service job identifier and the provisional global image identifier
    async fn submit(&self, request: &SubmitImageRequest) -> Result<SubmittedImage>;

    /// Queries the current status of a conversion job
    ///
    /// Polling has no side effects on the job.
    async fn poll(&self, job_id: &str) -> Result<ImageStatusResponse>;

    /// Copies a completed image to every other region the account can reach
    async fn distribute(&self, job: &ConversionJob) -> Result<()>;
}
