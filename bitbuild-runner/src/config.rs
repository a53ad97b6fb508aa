//! Runner configuration
//!
//! Defines all configurable parameters for a build run: local and remote
//! directory layout, image polling ceilings, host leases, the image service
//! backend, and notification settings. The build job itself is read from
//! its own set of variables by `job_from_env`.

use anyhow::Context;
use bitbuild_client::ImageConversionClient;
use bitbuild_core::domain::build::{BuildJob, BuildTriplet};
use bitbuild_core::domain::host::HostSpec;
use bitbuild_core::domain::image::StagingLocation;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::ConversionPoller;

/// Backend that converts packaged tarballs into images
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageServiceConfig {
    /// JSON API at a base URL
    Http { url: String },
    /// The `aws` CLI, distributing finished images to the listed regions
    Aws {
        region: String,
        distribution_regions: Vec<String>,
    },
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Deploy directory of the source tree; results and registry entries land here
    pub deploy_dir: PathBuf,

    /// Base directory on remote build hosts
    pub remote_build_dir: String,

    /// How often to poll a pending image
    pub poll_interval: Duration,

    /// Polls before giving up on a pending image (`None` waits forever)
    pub max_poll_attempts: Option<u32>,

    /// Wall-clock ceiling on polling
    pub poll_timeout: Option<Duration>,

    /// Transient poll errors tolerated in a row
    pub max_poll_errors: u32,

    /// Directory for crash-safe host leases
    pub lease_dir: Option<PathBuf>,

    /// How long a lease stays valid before a supervisor may reclaim the host
    pub lease_ttl: Duration,

    pub image_service: ImageServiceConfig,

    /// SNS topic for notifications; log-only when unset
    pub notify_topic: Option<String>,

    /// Variables re-exported to every stage command
    pub forward_env: Vec<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(deploy_dir: impl Into<PathBuf>) -> Self {
        Self {
            deploy_dir: deploy_dir.into(),
            remote_build_dir: "/home/centos/bitbuild".to_string(),
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: Some(1440), // 4 hours at the default interval
            poll_timeout: None,
            max_poll_errors: 3,
            lease_dir: None,
            lease_ttl: Duration::from_secs(24 * 3600),
            image_service: ImageServiceConfig::Aws {
                region: "us-east-1".to_string(),
                distribution_regions: Vec::new(),
            },
            notify_topic: None,
            forward_env: Vec::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - BITBUILD_DEPLOY_DIR (optional, default: current directory)
    /// - BITBUILD_REMOTE_BUILD_DIR (optional)
    /// - BITBUILD_POLL_INTERVAL (optional, seconds, default: 10)
    /// - BITBUILD_MAX_POLL_ATTEMPTS (optional, 0 for no limit, default: 1440)
    /// - BITBUILD_POLL_TIMEOUT (optional, seconds)
    /// - BITBUILD_MAX_POLL_ERRORS (optional, default: 3)
    /// - BITBUILD_LEASE_DIR (optional)
    /// - BITBUILD_LEASE_TTL (optional, seconds, default: 86400)
    /// - BITBUILD_IMAGE_SERVICE_URL (optional, selects the HTTP image service)
    /// - BITBUILD_AWS_REGION (optional, default: us-east-1)
    /// - BITBUILD_DISTRIBUTION_REGIONS (optional, comma separated)
    /// - BITBUILD_NOTIFY_TOPIC (optional)
    /// - BITBUILD_FORWARD_ENV (optional, comma separated variable names)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let deploy_dir = match lookup("BITBUILD_DEPLOY_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };

        let mut config = Self::new(deploy_dir);

        if let Some(dir) = lookup("BITBUILD_REMOTE_BUILD_DIR") {
            config.remote_build_dir = dir;
        }

        if let Some(secs) = parse::<u64>(&lookup, "BITBUILD_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(attempts) = parse::<u32>(&lookup, "BITBUILD_MAX_POLL_ATTEMPTS")? {
            config.max_poll_attempts = (attempts > 0).then_some(attempts);
        }

        config.poll_timeout =
            parse::<u64>(&lookup, "BITBUILD_POLL_TIMEOUT")?.map(Duration::from_secs);

        if let Some(errors) = parse::<u32>(&lookup, "BITBUILD_MAX_POLL_ERRORS")? {
            config.max_poll_errors = errors;
        }

        config.lease_dir = lookup("BITBUILD_LEASE_DIR").map(PathBuf::from);

        if let Some(secs) = parse::<u64>(&lookup, "BITBUILD_LEASE_TTL")? {
            config.lease_ttl = Duration::from_secs(secs);
        }

        config.image_service = match lookup("BITBUILD_IMAGE_SERVICE_URL") {
            Some(url) => ImageServiceConfig::Http { url },
            None => ImageServiceConfig::Aws {
                region: lookup("BITBUILD_AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                distribution_regions: split_list(lookup("BITBUILD_DISTRIBUTION_REGIONS")),
            },
        };

        config.notify_topic = lookup("BITBUILD_NOTIFY_TOPIC").filter(|t| !t.is_empty());
        config.forward_env = split_list(lookup("BITBUILD_FORWARD_ENV"));

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.deploy_dir.as_os_str().is_empty() {
            anyhow::bail!("deploy_dir cannot be empty");
        }

        if self.remote_build_dir.is_empty() {
            anyhow::bail!("remote_build_dir cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.lease_ttl.is_zero() {
            anyhow::bail!("lease_ttl must be greater than 0");
        }

        match &self.image_service {
            ImageServiceConfig::Http { url } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("image service url must start with http:// or https://");
                }
            }
            ImageServiceConfig::Aws { region, .. } => {
                if region.is_empty() {
                    anyhow::bail!("aws region cannot be empty");
                }
            }
        }

        Ok(())
    }

    /// Creates the image poller these settings describe
    pub fn poller(&self, client: Arc<dyn ImageConversionClient>) -> ConversionPoller {
        ConversionPoller::new(client)
            .with_interval(self.poll_interval)
            .with_max_attempts(self.max_poll_attempts)
            .with_timeout(self.poll_timeout)
            .with_max_consecutive_errors(self.max_poll_errors)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Reads the build job from environment variables
///
/// Expected environment variables:
/// - BUILD_NAME, BUILD_DESIGN, BUILD_TARGET_CONFIG, BUILD_PLATFORM_CONFIG,
///   BUILD_BUCKET (required)
/// - BUILD_DEPLOY_TRIPLET (optional)
/// - BUILD_HOST (optional, `localhost` or unset builds locally)
/// - BUILD_HOST_TEARDOWN (optional, command run locally to return a remote host)
/// - BUILD_POST_HOOK (optional)
pub fn job_from_env() -> anyhow::Result<BuildJob> {
    job_from_lookup(|key| std::env::var(key).ok())
}

pub fn job_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<BuildJob> {
    let required = |key: &str| {
        lookup(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
    };

    let triplet = BuildTriplet::new(
        required("BUILD_DESIGN")?,
        required("BUILD_TARGET_CONFIG")?,
        required("BUILD_PLATFORM_CONFIG")?,
    );

    let host = match lookup("BUILD_HOST").filter(|h| !h.is_empty() && h != "localhost") {
        Some(address) => HostSpec::Remote {
            address,
            teardown_command: lookup("BUILD_HOST_TEARDOWN").filter(|c| !c.is_empty()),
        },
        None => HostSpec::Local,
    };

    let mut job = BuildJob::new(
        required("BUILD_NAME")?,
        triplet,
        host,
        StagingLocation::new(required("BUILD_BUCKET")?),
    );

    if let Some(triplet) = lookup("BUILD_DEPLOY_TRIPLET").filter(|t| !t.is_empty()) {
        job = job.with_deploy_triplet(triplet);
    }
    if let Some(hook) = lookup("BUILD_POST_HOOK").filter(|h| !h.is_empty()) {
        job = job.with_post_build_hook(hook);
    }

    Ok(job)
}

/// Whether BUILD_BYPASS asks for the release-only fast path
pub fn bypass_from_env() -> bool {
    is_truthy(std::env::var("BUILD_BYPASS").ok().as_deref())
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {}", key, raw))
        })
        .transpose()
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_poll_attempts, Some(1440));
        assert_eq!(config.max_poll_errors, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = Duration::from_secs(10);

        config.image_service = ImageServiceConfig::Http {
            url: "not-a-url".to_string(),
        };
        assert!(config.validate().is_err());

        config.image_service = ImageServiceConfig::Http {
            url: "http://images.internal:8080".to_string(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("BITBUILD_DEPLOY_DIR", "/src/deploy"),
            ("BITBUILD_POLL_INTERVAL", "30"),
            ("BITBUILD_MAX_POLL_ATTEMPTS", "0"),
            ("BITBUILD_POLL_TIMEOUT", "7200"),
            ("BITBUILD_AWS_REGION", "us-west-2"),
            ("BITBUILD_DISTRIBUTION_REGIONS", "us-east-1, eu-west-1,"),
            ("BITBUILD_FORWARD_ENV", "AWS_PROFILE"),
        ]))
        .unwrap();

        assert_eq!(config.deploy_dir, PathBuf::from("/src/deploy"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_poll_attempts, None);
        assert_eq!(config.poll_timeout, Some(Duration::from_secs(7200)));
        assert_eq!(
            config.image_service,
            ImageServiceConfig::Aws {
                region: "us-west-2".to_string(),
                distribution_regions: vec!["us-east-1".to_string(), "eu-west-1".to_string()],
            }
        );
        assert_eq!(config.forward_env, vec!["AWS_PROFILE".to_string()]);
    }

    #[test]
    fn test_from_lookup_rejects_garbage_numbers() {
        let result = Config::from_lookup(lookup(&[
            ("BITBUILD_DEPLOY_DIR", "/src/deploy"),
            ("BITBUILD_POLL_INTERVAL", "soon"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_job_from_lookup() {
        let job = job_from_lookup(lookup(&[
            ("BUILD_NAME", "rocket-f1"),
            ("BUILD_DESIGN", "FireSim"),
            ("BUILD_TARGET_CONFIG", "Rocket"),
            ("BUILD_PLATFORM_CONFIG", "F1Config"),
            ("BUILD_BUCKET", "my-builds"),
            ("BUILD_HOST", "10.0.0.12"),
            ("BUILD_HOST_TEARDOWN", "release-instance"),
            ("BUILD_POST_HOOK", "upload.sh"),
        ]))
        .unwrap();

        assert_eq!(job.name, "rocket-f1");
        assert_eq!(job.triplet.to_string(), "FireSim-Rocket-F1Config");
        assert_eq!(job.deploy_triplet(), "FireSim-Rocket-F1Config");
        assert_eq!(job.staging.bucket, "my-builds");
        assert_eq!(job.post_build_hook.as_deref(), Some("upload.sh"));
        assert_eq!(
            job.host,
            HostSpec::Remote {
                address: "10.0.0.12".to_string(),
                teardown_command: Some("release-instance".to_string()),
            }
        );
    }

    #[test]
    fn test_job_requires_name() {
        let err = job_from_lookup(lookup(&[
            ("BUILD_DESIGN", "FireSim"),
            ("BUILD_TARGET_CONFIG", "Rocket"),
            ("BUILD_PLATFORM_CONFIG", "F1Config"),
            ("BUILD_BUCKET", "my-builds"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BUILD_NAME"));
    }

    #[test]
    fn test_localhost_builds_locally() {
        let job = job_from_lookup(lookup(&[
            ("BUILD_NAME", "n"),
            ("BUILD_DESIGN", "d"),
            ("BUILD_TARGET_CONFIG", "t"),
            ("BUILD_PLATFORM_CONFIG", "p"),
            ("BUILD_BUCKET", "b"),
            ("BUILD_HOST", "localhost"),
        ]))
        .unwrap();
        assert_eq!(job.host, HostSpec::Local);
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy(Some("1")));
        assert!(is_truthy(Some("TRUE")));
        assert!(!is_truthy(Some("0")));
        assert!(!is_truthy(None));
    }
}
