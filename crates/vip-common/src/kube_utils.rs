//! Kubernetes client construction and kube-rs error helpers

use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::{Error, Result};

/// Environment variable consulted when no `--kubeconfig` flag is given
pub const VIP_KUBECONFIG_ENV: &str = "VIP_KUBECONFIG";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How to reach the cluster
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Explicit kubeconfig path
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to select
    pub context: Option<String>,
}

/// Resolve a kubeconfig path using the priority chain.
///
/// 1. `explicit`: the `--kubeconfig` CLI flag
/// 2. `VIP_KUBECONFIG` env var
/// 3. `None`: fall back to kube defaults (`KUBECONFIG`, `~/.kube/config`, in-cluster)
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    match std::env::var(VIP_KUBECONFIG_ENV) {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => None,
    }
}

/// Create a kube client from the resolved kubeconfig and optional context.
///
/// No read timeout is set: log follows stay silent for as long as the test
/// suite prints nothing. Waits carry their own deadline and one-shot calls
/// race the run's cancellation token instead.
pub async fn create_client(options: &ClientOptions) -> Result<Client> {
    let kube_options = KubeConfigOptions {
        context: options.context.clone(),
        ..Default::default()
    };

    let mut config = match resolve_kubeconfig(options.kubeconfig.as_deref()) {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &kube_options)
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None if options.context.is_some() => Config::from_kubeconfig(&kube_options)
            .await
            .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?,
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = None;

    Client::try_from(config)
        .map_err(|e| Error::control_plane("create client", e.to_string()))
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}
