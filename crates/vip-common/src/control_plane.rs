//! Control-plane access for VIP runs
//!
//! [`ControlPlane`] is the narrow set of cluster operations a run needs:
//! reading the site resource, publishing config and credentials, submitting
//! the job, and watching it. [`KubeControlPlane`] implements it with kube-rs;
//! tests substitute mocks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams, Patch, PatchParams,
    PostParams,
};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::{debug, info};

use crate::kube_utils::is_not_found;
use crate::site::SiteRef;
use crate::status::JobStatus;
use crate::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "vip";

/// Label the Job controller puts on every pod it creates
pub const JOB_NAME_LABEL: &str = "job-name";

/// Container waiting reasons that mean the image will never start
pub const IMAGE_PULL_REASONS: [&str; 3] = ["ErrImagePull", "ImagePullBackOff", "InvalidImageName"];

/// Interval between pod status checks while waiting for the container to start
const CONTAINER_START_INTERVAL: Duration = Duration::from_secs(1);

/// Whether a container waiting reason (or an API error message) signals an unpullable image
pub fn is_image_pull_failure(text: &str) -> bool {
    IMAGE_PULL_REASONS.iter().any(|r| text.contains(r))
        || text.contains("image can't be pulled")
        || text.contains("failed to pull image")
        || text.contains("trying and failing to pull image")
}

/// Cluster operations required by a VIP run.
///
/// Every operation is scoped to a namespace. Deletes ignore not-found so they
/// are safe to repeat.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the site custom resource as a JSON object
    async fn get_site(&self, site: &SiteRef) -> Result<serde_json::Value>;

    /// Create or update a ConfigMap holding `data` under `key`
    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        data: &str,
    ) -> Result<()>;

    /// Check whether a Secret exists
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Read and decode a Secret's data, or `None` if it doesn't exist
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Create or update a Secret with the given string data
    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Submit a batch Job
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()>;

    /// Name of a pod created for the job, if one exists yet
    async fn find_job_pod(&self, namespace: &str, job: &str) -> Result<Option<String>>;

    /// Stream a pod's output to stdout until the stream closes.
    ///
    /// Returns `Error::ImagePull` if the container cannot start because its
    /// image cannot be pulled.
    async fn follow_pod_logs(&self, namespace: &str, pod: &str) -> Result<()>;

    /// Current `Complete`/`Failed` conditions of a job
    async fn job_status(&self, namespace: &str, job: &str) -> Result<JobStatus>;

    /// Delete a job and its pods, ignoring not-found
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete a ConfigMap, ignoring not-found
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;
}

/// kube-rs implementation of [`ControlPlane`]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Create a new KubeControlPlane wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// What a pod's container is doing before its output can be followed
#[derive(Debug, PartialEq, Eq)]
enum ContainerStart {
    /// Running or already terminated; logs are available
    Started,
    /// Image can never be pulled
    ImagePullFailed(String),
    /// Still pending (scheduling, ContainerCreating, ...)
    Waiting,
}

fn container_start_state(pod: &Pod) -> ContainerStart {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    for status in statuses {
        let Some(state) = status.state.as_ref() else {
            continue;
        };
        if state.running.is_some() || state.terminated.is_some() {
            return ContainerStart::Started;
        }
        if let Some(waiting) = state.waiting.as_ref() {
            let reason = waiting.reason.as_deref().unwrap_or_default();
            if is_image_pull_failure(reason) {
                let message = waiting.message.as_deref().unwrap_or_default();
                return ContainerStart::ImagePullFailed(format!("{}: {}", reason, message));
            }
        }
    }

    // A pod that finished before we looked has no waiting containers left
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") | Some("Failed") => ContainerStart::Started,
        _ => ContainerStart::Waiting,
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_site(&self, site: &SiteRef) -> Result<serde_json::Value> {
        let (group, version) = site.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &site.kind);
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &site.namespace, &ar);

        let object = api.get(&site.name).await.map_err(|e| {
            if is_not_found(&e) {
                Error::config(format!(
                    "{} {}/{} not found",
                    site.kind, site.namespace, site.name
                ))
            } else {
                Error::control_plane(
                    "get site",
                    format!("{} {}/{}: {}", site.kind, site.namespace, site.name, e),
                )
            }
        })?;

        Ok(serde_json::to_value(object)?)
    }

    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        data: &str,
    ) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(key.to_string(), data.to_string())])),
            ..Default::default()
        };

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&config_map),
        )
        .await
        .map_err(|e| {
            Error::control_plane("apply config map", format!("{}/{}: {}", namespace, name, e))
        })?;

        debug!(namespace, name, "applied config map");
        Ok(())
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::control_plane(
                "check secret",
                format!("{}/{}: {}", namespace, name, e),
            )),
        }
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(Error::control_plane(
                    "get secret",
                    format!("{}/{}: {}", namespace, name, e),
                ))
            }
        };

        let mut decoded = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            let text = String::from_utf8(value.0).map_err(|_| {
                Error::control_plane(
                    "get secret",
                    format!("{}/{} key {} is not valid UTF-8", namespace, name, key),
                )
            })?;
            decoded.insert(key, text);
        }
        decoded.extend(secret.string_data.unwrap_or_default());
        Ok(Some(decoded))
    }

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k, ByteString(v.into_bytes())))
                    .collect(),
            ),
            ..Default::default()
        };

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .map_err(|e| Error::control_plane("apply secret", format!("{}/{}: {}", namespace, name, e)))?;

        debug!(namespace, name, "applied secret");
        Ok(())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let name = job.metadata.name.as_deref().unwrap_or_default();
        api.create(&PostParams::default(), job)
            .await
            .map_err(|e| Error::control_plane("create job", format!("{}/{}: {}", namespace, name, e)))?;
        info!(namespace, job = %name, "submitted job");
        Ok(())
    }

    async fn find_job_pod(&self, namespace: &str, job: &str) -> Result<Option<String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(&format!("{}={}", JOB_NAME_LABEL, job)))
            .await
            .map_err(|e| Error::control_plane("list pods", format!("job {}/{}: {}", namespace, job, e)))?;

        Ok(pods.items.into_iter().find_map(|p| p.metadata.name))
    }

    async fn follow_pod_logs(&self, namespace: &str, pod: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        loop {
            let current = api
                .get(pod)
                .await
                .map_err(|e| Error::control_plane("get pod", format!("{}/{}: {}", namespace, pod, e)))?;
            match container_start_state(&current) {
                ContainerStart::Started => break,
                ContainerStart::ImagePullFailed(reason) => {
                    return Err(Error::ImagePull {
                        pod: pod.to_string(),
                        reason,
                    })
                }
                ContainerStart::Waiting => tokio::time::sleep(CONTAINER_START_INTERVAL).await,
            }
        }

        let params = LogParams {
            follow: true,
            ..Default::default()
        };
        let stream = api.log_stream(pod, &params).await.map_err(|e| {
            let message = e.to_string();
            if is_image_pull_failure(&message) {
                Error::ImagePull {
                    pod: pod.to_string(),
                    reason: message,
                }
            } else {
                Error::control_plane("attach logs", format!("{}/{}: {}", namespace, pod, message))
            }
        })?;

        let mut lines = stream.lines();
        while let Some(line) = lines.try_next().await? {
            println!("{}", line);
        }
        Ok(())
    }

    async fn job_status(&self, namespace: &str, job: &str) -> Result<JobStatus> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let current = api
            .get(job)
            .await
            .map_err(|e| Error::control_plane("get job", format!("{}/{}: {}", namespace, job, e)))?;

        Ok(JobStatus::from_conditions(
            current
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_deref()),
        ))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::control_plane(
                "delete job",
                format!("{}/{}: {}", namespace, name, e),
            )),
        }
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::control_plane(
                "delete config map",
                format!("{}/{}: {}", namespace, name, e),
            )),
        }
    }
}
