//! Post-build hook invocation

use std::path::Path;
use tracing::{debug, info, warn};

use crate::context::{ExecContext, shell_quote};
use crate::executor::RemoteExecutor;

/// Runs an operator hook with the local results directory as its argument
///
/// Best-effort: the exit status is logged and returned, never enforced.
/// `None` means the hook could not be started.
pub async fn run_post_build_hook(
    executor: &dyn RemoteExecutor,
    ctx: &ExecContext,
    hook: &str,
    results_dir: &Path,
) -> Option<i32> {
    let command = format!("{} {}", hook, shell_quote(&results_dir.to_string_lossy()));
    info!("Running post-build hook: {}", command);

    match executor.execute(ctx, &command).await {
        Ok(output) => {
            debug!("[{}] hook stdout: {}", ctx.host, output.stdout.trim());
            debug!("[{}] hook stderr: {}", ctx.host, output.stderr.trim());
            if output.success() {
                info!("Post-build hook finished");
            } else {
                warn!("Post-build hook exited with {}", output.exit_code);
            }
            Some(output.exit_code)
        }
        Err(e) => {
            warn!("Failed to run post-build hook: {}", e);
            None
        }
    }
}
