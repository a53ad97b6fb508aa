//! AWS CLI conversion client
//!
//! Stages tarballs in S3 and converts them into EC2 FPGA images by shelling
//! out to the `aws` CLI:
//! - `aws s3 cp` uploads the tarball
//! - `aws ec2 create-fpga-image` starts the conversion
//! - `aws ec2 describe-fpga-images` reports its state
//! - `aws ec2 copy-fpga-image` replicates the finished image to other regions

use async_trait::async_trait;
use bitbuild_core::domain::image::{ConversionJob, ConversionStatus};
use bitbuild_core::dto::image::{ImageStatusResponse, SubmitImageRequest, SubmittedImage};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::ImageConversionClient;
use crate::error::{ClientError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateFpgaImageOutput {
    fpga_image_id: String,
    fpga_image_global_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeFpgaImagesOutput {
    fpga_images: Vec<FpgaImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FpgaImage {
    state: FpgaImageState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FpgaImageState {
    code: String,
}

/// Conversion client backed by S3 and EC2 FPGA images
#[derive(Debug, Clone)]
pub struct AwsCliConversionClient {
    /// Region the image is created in
    region: String,
    /// Regions the finished image is copied to
    distribution_regions: Vec<String>,
    /// Key prefix for conversion logs in the staging bucket
    logs_prefix: String,
}

impl AwsCliConversionClient {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            distribution_regions: Vec::new(),
            logs_prefix: "logs/".to_string(),
        }
    }

    /// Sets the regions a finished image is replicated to
    pub fn with_distribution_regions(mut self, regions: Vec<String>) -> Self {
        self.distribution_regions = regions;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Distribution regions other than the source region
    pub fn distribution_targets(&self) -> Vec<&str> {
        self.distribution_regions
            .iter()
            .map(String::as_str)
            .filter(|r| *r != self.region)
            .collect()
    }

    fn create_image_args(&self, request: &SubmitImageRequest) -> Vec<String> {
        vec![
            "ec2".to_string(),
            "create-fpga-image".to_string(),
            "--region".to_string(),
            self.region.clone(),
            "--input-storage-location".to_string(),
            format!(
                "Bucket={},Key={}",
                request.destination.bucket,
                request.staged_key()
            ),
            "--logs-storage-location".to_string(),
            format!(
                "Bucket={},Key={}",
                request.destination.bucket, self.logs_prefix
            ),
            "--name".to_string(),
            request.name.clone(),
            "--description".to_string(),
            request.description.clone(),
        ]
    }

    /// Runs an aws CLI command and returns its stdout
    async fn run(&self, args: &[String]) -> Result<String> {
        let command = format!("aws {}", args.join(" "));
        debug!("Running {}", command);

        let output = Command::new("aws").args(args).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", command, stderr.trim());
        }

        if !output.status.success() {
            return Err(ClientError::CommandFailed {
                command,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

fn parse_create_output(raw: &str) -> Result<SubmittedImage> {
    let parsed: CreateFpgaImageOutput = serde_json::from_str(raw).map_err(|e| {
        ClientError::ParseError(format!("create-fpga-image output: {}", e))
    })?;

    Ok(SubmittedImage {
        job_id: parsed.fpga_image_id,
        image_id: parsed.fpga_image_global_id,
    })
}

fn parse_describe_output(raw: &str) -> Result<ImageStatusResponse> {
    let parsed: DescribeFpgaImagesOutput = serde_json::from_str(raw).map_err(|e| {
        ClientError::ParseError(format!("describe-fpga-images output: {}", e))
    })?;

    let image = parsed.fpga_images.first().ok_or_else(|| {
        ClientError::ParseError("describe-fpga-images returned no images".to_string())
    })?;

    Ok(ImageStatusResponse {
        status: ConversionStatus::from_code(&image.state.code),
        detail: Some(raw.to_string()),
    })
}

#[async_trait]
impl ImageConversionClient for AwsCliConversionClient {
    async fn submit(&self, request: &SubmitImageRequest) -> Result<SubmittedImage> {
        let destination = format!(
            "s3://{}/{}",
            request.destination.bucket,
            request.staged_key()
        );
        info!(
            "Staging {} at {}",
            request.artifact_path.display(),
            destination
        );

        self.run(&[
            "s3".to_string(),
            "cp".to_string(),
            request.artifact_path.to_string_lossy().to_string(),
            destination,
        ])
        .await?;

        let raw = self.run(&self.create_image_args(request)).await?;
        let submitted = parse_create_output(&raw)?;

        info!("Resulting AGFI: {}", submitted.image_id);
        info!("Resulting AFI: {}", submitted.job_id);
        Ok(submitted)
    }

    async fn poll(&self, job_id: &str) -> Result<ImageStatusResponse> {
        let raw = self
            .run(&[
                "ec2".to_string(),
                "describe-fpga-images".to_string(),
                "--region".to_string(),
                self.region.clone(),
                "--fpga-image-ids".to_string(),
                job_id.to_string(),
            ])
            .await?;

        parse_describe_output(&raw)
    }

    async fn distribute(&self, job: &ConversionJob) -> Result<()> {
        let mut first_error = None;

        for target in self.distribution_targets() {
            info!("Copying AFI {} to {}", job.job_id, target);
            let result = self
                .run(&[
                    "ec2".to_string(),
                    "copy-fpga-image".to_string(),
                    "--source-fpga-image-id".to_string(),
                    job.job_id.clone(),
                    "--source-region".to_string(),
                    self.region.clone(),
                    "--region".to_string(),
                    target.to_string(),
                ])
                .await;

            if let Err(e) = result {
                warn!("Failed to copy AFI {} to {}: {}", job.job_id, target, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
