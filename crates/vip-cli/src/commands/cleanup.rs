//! `vip cleanup`: remove the job and config map of an interrupted run
//!
//! Runs that exit normally clean up after themselves. This is for runs that
//! were killed hard; the names are in the run's log output.

use std::time::Duration;

use clap::Args;

use vip_common::naming::ResourceNames;
use vip_common::Result;
use vip_job::cleanup;

use crate::duration::parse_duration;
use crate::GlobalArgs;

/// Delete a run's ephemeral resources
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Namespace the run used
    #[arg(long, short = 'n', env = "VIP_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Job to delete
    #[arg(long)]
    pub job: String,

    /// Config map to delete
    #[arg(long)]
    pub config_map: String,

    /// How long to wait for the deletes
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub timeout: Duration,
}

/// Run the cleanup command.
///
/// Like the cleanup at the end of a run, failures are logged rather than
/// returned; the credential secret is never touched.
pub async fn run(args: CleanupArgs, global: &GlobalArgs) -> Result<()> {
    let control_plane = super::control_plane(&global.client_options()).await?;
    let names = ResourceNames {
        config_map: args.config_map,
        job: args.job,
    };
    cleanup(&control_plane, &args.namespace, &names, args.timeout).await;
    Ok(())
}
