//! Bitbuild Runner binary
//!
//! Reads the runner configuration and one build job from the environment,
//! runs the job, and exits non-zero when the build fails.

use anyhow::{Context, Result};
use bitbuild_client::{AwsCliConversionClient, HttpConversionClient, ImageConversionClient};
use bitbuild_runner::config::{self, Config, ImageServiceConfig};
use bitbuild_runner::executor::{RemoteExecutor, ShellExecutor};
use bitbuild_runner::host::{BuildHostHandle, LeaseLedger};
use bitbuild_runner::notify::{Notifier, SnsNotifier, TracingNotifier};
use bitbuild_runner::{BuildOrchestrator, BuildOutcome};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitbuild_runner=info,bitbuild_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Bitbuild Runner");

    let config = load_config()?;
    let job = config::job_from_env().context("Failed to read build job")?;
    let bypass = config::bypass_from_env();

    info!(
        "Loaded build {} (triplet {}, deploy dir {})",
        job.name,
        job.triplet,
        config.deploy_dir.display()
    );

    let executor: Arc<dyn RemoteExecutor> = Arc::new(ShellExecutor::new());
    let client = image_client(&config);
    let notifier = notifier(&config);

    let leases = config.lease_dir.clone().map(LeaseLedger::new);
    if let Some(ledger) = &leases {
        report_expired_leases(ledger).await;
    }

    let host = BuildHostHandle::for_spec(
        &job.host,
        job.id,
        executor.clone(),
        leases,
        config.lease_ttl,
    );

    let orchestrator = BuildOrchestrator::new(job, host, executor, client, notifier, config);

    // Ctrl-C stops polling and still releases the host
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling build");
            cancel.cancel();
        }
    });

    match orchestrator.run(bypass).await {
        BuildOutcome::Succeeded { descriptor, .. } => {
            info!("Build complete, image {}", descriptor.image_id);
            Ok(())
        }
        BuildOutcome::Bypassed => {
            info!("Bypass run complete");
            Ok(())
        }
        BuildOutcome::Failed { stage, error, .. } => {
            match stage {
                Some(stage) => error!("Build failed at {}: {}", stage, error),
                None => error!("Build failed before any stage: {}", error),
            }
            Err(anyhow::anyhow!("Build failed: {}", error))
        }
    }
}

/// Loads configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

fn image_client(config: &Config) -> Arc<dyn ImageConversionClient> {
    match &config.image_service {
        ImageServiceConfig::Http { url } => {
            info!("Using image service at {}", url);
            Arc::new(HttpConversionClient::new(url.clone()))
        }
        ImageServiceConfig::Aws {
            region,
            distribution_regions,
        } => {
            info!("Using aws CLI in {}", region);
            Arc::new(
                AwsCliConversionClient::new(region.clone())
                    .with_distribution_regions(distribution_regions.clone()),
            )
        }
    }
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    match (&config.notify_topic, &config.image_service) {
        (Some(topic), ImageServiceConfig::Aws { region, .. }) => {
            Arc::new(SnsNotifier::new(topic.clone()).with_region(region.clone()))
        }
        (Some(topic), _) => Arc::new(SnsNotifier::new(topic.clone())),
        (None, _) => Arc::new(TracingNotifier::new()),
    }
}

/// Warns about hosts left behind by runs that died mid-build
async fn report_expired_leases(ledger: &LeaseLedger) {
    match ledger.expired(chrono::Utc::now()).await {
        Ok(expired) => {
            for lease in expired {
                warn!(
                    "Orphaned build host {} from job {} (pid {}, expired {})",
                    lease.host, lease.job_id, lease.pid, lease.expires_at
                );
            }
        }
        Err(e) => warn!("Failed to read leases in {}: {}", ledger.dir().display(), e),
    }
}
