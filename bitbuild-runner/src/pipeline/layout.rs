//! Filesystem layout of a bitstream build
//!
//! Every path a build touches derives from the deploy directory, the build
//! triplet and the job's results directory name.

use bitbuild_core::domain::build::BuildJob;
use std::path::{Path, PathBuf};

/// RTL produced by design generation, kept alongside the build results
pub const GENERATED_RTL: &str = "FireSim-generated.sv";

/// File the last image status detail is written to
pub const IMAGE_INFO_FILE: &str = "AGFI_INFO";

/// Paths for one build job on the local machine and on the build host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    deploy_dir: PathBuf,
    remote_build_dir: String,
    triplet: String,
    build_dir_name: String,
}

impl BuildLayout {
    pub fn new(
        deploy_dir: impl Into<PathBuf>,
        remote_build_dir: impl Into<String>,
        job: &BuildJob,
    ) -> Self {
        Self {
            deploy_dir: deploy_dir.into(),
            remote_build_dir: remote_build_dir.into(),
            triplet: job.triplet.to_string(),
            build_dir_name: job.build_dir_name(),
        }
    }

    pub fn deploy_dir(&self) -> &Path {
        &self.deploy_dir
    }

    /// Root of the source tree the deploy directory lives in
    pub fn source_root(&self) -> PathBuf {
        self.deploy_dir.join("..")
    }

    /// Local checkout of the FPGA developer kit
    pub fn platform_dir(&self) -> PathBuf {
        self.source_root().join("platforms/f1/aws-fpga")
    }

    /// Custom logic directory relative to the developer kit root
    pub fn cl_postfix(&self) -> String {
        format!("hdk/cl/developer_designs/cl_{}", self.triplet)
    }

    pub fn local_cl_dir(&self) -> PathBuf {
        self.platform_dir().join(self.cl_postfix())
    }

    pub fn build_script(&self) -> PathBuf {
        self.source_root().join("platforms/f1/build-bitstream.sh")
    }

    pub fn generated_rtl(&self) -> PathBuf {
        self.local_cl_dir().join("design").join(GENERATED_RTL)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.deploy_dir
            .join("results-build")
            .join(&self.build_dir_name)
    }

    /// Directory holding one registry entry file per finished build
    pub fn registry_dir(&self) -> PathBuf {
        self.deploy_dir.join("built-hwdb-entries")
    }

    /// Where the packaged tarball lands once results are synced back
    pub fn artifact_dir(&self) -> PathBuf {
        self.results_dir()
            .join(format!("cl_{}", self.triplet))
            .join("build/checkpoints/to_aws")
    }

    pub fn image_info_file(&self) -> PathBuf {
        self.results_dir().join(IMAGE_INFO_FILE)
    }

    /// Platform directory on a remote build host, with trailing slash
    pub fn remote_platform_dir(&self) -> String {
        format!("{}/platforms/f1/", self.remote_build_dir.trim_end_matches('/'))
    }

    pub fn remote_cl_dir(&self) -> String {
        format!("{}aws-fpga/{}", self.remote_platform_dir(), self.cl_postfix())
    }

    /// Custom logic directory on the acquired host
    pub fn cl_dir_for(&self, local: bool) -> String {
        if local {
            self.local_cl_dir().to_string_lossy().to_string()
        } else {
            self.remote_cl_dir()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitbuild_core::domain::build::BuildTriplet;
    use bitbuild_core::domain::host::HostSpec;
    use bitbuild_core::domain::image::StagingLocation;

    fn layout() -> BuildLayout {
        let job = BuildJob::new(
            "rocket",
            BuildTriplet::new("FireSim", "Rocket", "F1Config"),
            HostSpec::Local,
            StagingLocation::new("bucket"),
        );
        BuildLayout::new("/src/deploy", "/home/centos/build", &job)
    }

    #[test]
    fn test_local_paths() {
        let layout = layout();
        assert_eq!(
            layout.local_cl_dir(),
            PathBuf::from("/src/deploy/../platforms/f1/aws-fpga/hdk/cl/developer_designs/cl_FireSim-Rocket-F1Config")
        );
        assert_eq!(
            layout.build_script(),
            PathBuf::from("/src/deploy/../platforms/f1/build-bitstream.sh")
        );
        assert_eq!(
            layout.registry_dir(),
            PathBuf::from("/src/deploy/built-hwdb-entries")
        );
        assert!(
            layout
                .artifact_dir()
                .ends_with("cl_FireSim-Rocket-F1Config/build/checkpoints/to_aws")
        );
        assert!(layout.results_dir().starts_with("/src/deploy/results-build"));
    }

    #[test]
    fn test_remote_paths() {
        let layout = layout();
        assert_eq!(layout.remote_platform_dir(), "/home/centos/build/platforms/f1/");
        assert_eq!(
            layout.cl_dir_for(false),
            "/home/centos/build/platforms/f1/aws-fpga/hdk/cl/developer_designs/cl_FireSim-Rocket-F1Config"
        );
    }
}
