//! Removal of a run's ephemeral resources

use std::time::Duration;

use tracing::{info, warn};

use vip_common::naming::ResourceNames;
use vip_common::ControlPlane;

/// Budget for deleting a run's resources, independent of the run's own deadline
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delete the run's job and config map, ignoring resources that are already gone.
///
/// Runs under its own `timeout` and is not tied to the run's cancellation
/// token, so an expired or cancelled run still cleans up. Failures are logged
/// and never returned: a stuck resource must not hide the run's result.
///
/// The credential secret is deliberately left in place. It is reused by
/// later runs in the namespace and is not an ephemeral resource.
pub async fn cleanup(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    names: &ResourceNames,
    timeout: Duration,
) {
    let work = async {
        if let Err(e) = control_plane.delete_job(namespace, &names.job).await {
            warn!(namespace, job = %names.job, error = %e, "failed to delete job");
        }
        if let Err(e) = control_plane
            .delete_config_map(namespace, &names.config_map)
            .await
        {
            warn!(namespace, config_map = %names.config_map, error = %e, "failed to delete config map");
        }
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(()) => info!(namespace, job = %names.job, config_map = %names.config_map, "cleaned up run resources"),
        Err(_) => warn!(namespace, ?timeout, "cleanup timed out; resources may need manual removal"),
    }
}
