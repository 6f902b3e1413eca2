//! CLI commands

use vip_common::kube_utils::{create_client, ClientOptions};
use vip_common::{KubeControlPlane, Result};

pub mod cleanup;
pub mod run;

/// Connect to the cluster selected by `options`
pub async fn control_plane(options: &ClientOptions) -> Result<KubeControlPlane> {
    let client = create_client(options).await?;
    Ok(KubeControlPlane::new(client))
}
