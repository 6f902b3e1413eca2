//! Job observation
//!
//! A submitted job is followed in three stages, each with its own deadline:
//!
//! 1. [`await_pod`]: wait for the job's pod to appear
//! 2. [`stream_output`]: follow the pod's output to stdout
//! 3. [`await_completion`]: poll the job's conditions until it is terminal
//!
//! Only an image-pull failure in stage 2 is fatal there; any other streaming
//! problem is logged and observation moves on to stage 3, since not being
//! able to tail logs says nothing about whether the tests passed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vip_common::poll::wait_with_timeout;
use vip_common::status::JobOutcome;
use vip_common::{ControlPlane, Error, Result};

/// Stage name reported when no pod appears in time
pub const STAGE_POD: &str = "pod creation";

/// Stage name reported when the job reaches no terminal condition in time
pub const STAGE_COMPLETION: &str = "job completion";

/// Timeouts and poll intervals for the three observation stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverSettings {
    /// How long to wait for the pod to appear
    pub pod_timeout: Duration,
    /// Interval between pod lookups
    pub pod_interval: Duration,
    /// Overall job timeout, bounding both output streaming and completion polling
    pub job_timeout: Duration,
    /// Interval between job status reads
    pub status_interval: Duration,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            pod_timeout: Duration::from_secs(30),
            pod_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(15 * 60),
            status_interval: Duration::from_secs(5),
        }
    }
}

/// Wait for a pod of `job` to exist and return its name.
///
/// Lookup errors are treated as transient and retried on the next tick.
pub async fn await_pod(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    job: &str,
    settings: &ObserverSettings,
    cancel: &CancellationToken,
) -> Result<String> {
    let pod = wait_with_timeout(
        STAGE_POD,
        settings.pod_timeout,
        settings.pod_interval,
        cancel,
        || async move {
            match control_plane.find_job_pod(namespace, job).await {
                Ok(found) => Ok(found),
                Err(e) => {
                    warn!(job, error = %e, "pod lookup failed, retrying");
                    Ok(None)
                }
            }
        },
    )
    .await?;

    info!(job, pod = %pod, "job pod created");
    Ok(pod)
}

/// Follow the pod's output until it ends, the job timeout elapses, or the run is cancelled.
///
/// Returns `Err` only for `Error::ImagePull`; every other failure is a warning.
pub async fn stream_output(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    pod: &str,
    settings: &ObserverSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    let followed = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(pod, "run cancelled while streaming output");
            return Ok(());
        }
        followed = tokio::time::timeout(
            settings.job_timeout,
            control_plane.follow_pod_logs(namespace, pod),
        ) => followed,
    };

    match followed {
        Ok(Ok(())) => {
            debug!(pod, "output stream closed");
            Ok(())
        }
        Ok(Err(e)) if e.is_image_pull() => Err(e),
        Ok(Err(e)) => {
            warn!(pod, error = %e, "could not stream test output");
            Ok(())
        }
        Err(_) => {
            warn!(pod, timeout = ?settings.job_timeout, "output stream still open at job timeout");
            Ok(())
        }
    }
}

/// Poll the job's conditions until it succeeds or fails.
///
/// Success is `Ok(())`; an observed failure is `Error::JobFailed`. Status read
/// errors are logged and polling continues. A cancelled run fails immediately
/// with a timeout error.
pub async fn await_completion(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    job: &str,
    settings: &ObserverSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome = wait_with_timeout(
        STAGE_COMPLETION,
        settings.job_timeout,
        settings.status_interval,
        cancel,
        || async move {
            match control_plane.job_status(namespace, job).await {
                Ok(status) => Ok(status.outcome()),
                Err(e) => {
                    warn!(job, error = %e, "failed to read job status, retrying");
                    Ok(None)
                }
            }
        },
    )
    .await?;

    match outcome {
        JobOutcome::Succeeded => {
            info!(job, "job completed successfully");
            Ok(())
        }
        JobOutcome::Failed => Err(Error::JobFailed {
            job: job.to_string(),
        }),
    }
}

/// Run all three stages against a submitted job
pub async fn observe_job(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    job: &str,
    settings: &ObserverSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    let pod = await_pod(control_plane, namespace, job, settings, cancel).await?;
    stream_output(control_plane, namespace, &pod, settings, cancel).await?;
    await_completion(control_plane, namespace, job, settings, cancel).await
}
