//! Build domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::host::HostSpec;
use super::image::StagingLocation;

/// Hardware configuration identity: design, target and platform config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTriplet {
    pub design: String,
    pub target_config: String,
    pub platform_config: String,
}

impl BuildTriplet {
    pub fn new(
        design: impl Into<String>,
        target_config: impl Into<String>,
        platform_config: impl Into<String>,
    ) -> Self {
        Self {
            design: design.into(),
            target_config: target_config.into(),
            platform_config: platform_config.into(),
        }
    }

    /// Renders a make invocation for this triplet
    ///
    /// # Arguments
    /// * `target` - Make target plus any extra variables (e.g. "PLATFORM=f1 driver")
    pub fn make_recipe(&self, target: &str) -> String {
        format!(
            "make DESIGN={} TARGET_CONFIG={} PLATFORM_CONFIG={} {}",
            self.design, self.target_config, self.platform_config, target
        )
    }
}

impl fmt::Display for BuildTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.design, self.target_config, self.platform_config
        )
    }
}

/// One bitstream build attempt
///
/// Immutable once requested. The runner owns it for the duration of the
/// pipeline; identifiers are shared read-only with notifications and the
/// registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: Uuid,
    /// Build name, also used as the image name and registry file name
    pub name: String,
    pub triplet: BuildTriplet,
    /// Triplet to deploy with, when it differs from the build triplet
    pub deploy_triplet: Option<String>,
    pub host: HostSpec,
    pub staging: StagingLocation,
    /// Command invoked with the local results directory after a successful build
    pub post_build_hook: Option<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

impl BuildJob {
    pub fn new(
        name: impl Into<String>,
        triplet: BuildTriplet,
        host: HostSpec,
        staging: StagingLocation,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            triplet,
            deploy_triplet: None,
            host,
            staging,
            post_build_hook: None,
            requested_at: chrono::Utc::now(),
        }
    }

    pub fn with_deploy_triplet(mut self, triplet: impl Into<String>) -> Self {
        self.deploy_triplet = Some(triplet.into());
        self
    }

    pub fn with_post_build_hook(mut self, hook: impl Into<String>) -> Self {
        self.post_build_hook = Some(hook.into());
        self
    }

    /// Deploy triplet, falling back to the build triplet
    pub fn deploy_triplet(&self) -> String {
        self.deploy_triplet
            .clone()
            .unwrap_or_else(|| self.triplet.to_string())
    }

    /// Directory name under the results area for this build
    pub fn build_dir_name(&self) -> String {
        format!(
            "{}-{}",
            self.requested_at.format("%Y-%m-%d--%H-%M-%S"),
            self.name
        )
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStage {
    GenerateDesign,
    BuildDriver,
    Synthesize,
    PackageArtifact,
    SubmitImage,
    PollImage,
    Distribute,
    Notify,
}

impl BuildStage {
    const ORDER: [BuildStage; 8] = [
        BuildStage::GenerateDesign,
        BuildStage::BuildDriver,
        BuildStage::Synthesize,
        BuildStage::PackageArtifact,
        BuildStage::SubmitImage,
        BuildStage::PollImage,
        BuildStage::Distribute,
        BuildStage::Notify,
    ];

    /// All stages in order
    pub fn all() -> &'static [BuildStage] {
        &Self::ORDER
    }

    /// The stage that follows this one, or `None` after `Notify`
    pub fn next(self) -> Option<Self> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::GenerateDesign => "generate-design",
            BuildStage::BuildDriver => "build-driver",
            BuildStage::Synthesize => "synthesize",
            BuildStage::PackageArtifact => "package-artifact",
            BuildStage::SubmitImage => "submit-image",
            BuildStage::PollImage => "poll-image",
            BuildStage::Distribute => "distribute",
            BuildStage::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// Outcome of one stage command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Success,
    Failure { exit_code: i32, diagnostic: String },
}

impl StageResult {
    /// Maps a command exit code and its captured output
    pub fn from_exit(exit_code: i32, diagnostic: impl Into<String>) -> Self {
        if exit_code == 0 {
            StageResult::Success
        } else {
            StageResult::Failure {
                exit_code,
                diagnostic: diagnostic.into(),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_job() -> BuildJob {
        BuildJob::new(
            "rocket-single",
            BuildTriplet::new("FireSim", "DDR3FRFCFS", "BaseF1Config"),
            HostSpec::Local,
            StagingLocation::new("bucket"),
        )
    }

    #[test]
    fn test_triplet_display_and_recipe() {
        let triplet = BuildTriplet::new("FireSim", "T", "P");
        assert_eq!(triplet.to_string(), "FireSim-T-P");
        assert_eq!(
            triplet.make_recipe("PLATFORM=f1 driver"),
            "make DESIGN=FireSim TARGET_CONFIG=T PLATFORM_CONFIG=P PLATFORM=f1 driver"
        );
    }

    #[test]
    fn test_deploy_triplet_fallback() {
        let job = sample_job();
        assert_eq!(job.deploy_triplet(), "FireSim-DDR3FRFCFS-BaseF1Config");

        let job = job.with_deploy_triplet("FireSim-Other-BaseF1Config");
        assert_eq!(job.deploy_triplet(), "FireSim-Other-BaseF1Config");
    }

    #[test]
    fn test_build_dir_name() {
        let mut job = sample_job();
        job.requested_at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(job.build_dir_name(), "2024-03-09--07-05-01-rocket-single");
    }

    #[test]
    fn test_stage_order() {
        let mut stage = BuildStage::GenerateDesign;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, BuildStage::all());
        assert_eq!(BuildStage::Notify.next(), None);
    }

    #[test]
    fn test_stage_result_from_exit() {
        assert!(StageResult::from_exit(0, "").is_success());
        assert_eq!(
            StageResult::from_exit(2, "boom"),
            StageResult::Failure {
                exit_code: 2,
                diagnostic: "boom".to_string()
            }
        );
    }
}
