//! Compiles a [`JobDescriptor`] into a batch `Job`
//!
//! Every user-influenced field (name, image, category) is placed into typed
//! k8s-openapi structs and serialized by the client; nothing is templated
//! into text.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use vip_common::{
    Error, Result, SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY, TEST_PASSWORD_ENV, TEST_USERNAME_ENV,
};

/// Name of the single test-suite container
pub const CONTAINER_NAME: &str = "vip";

/// ConfigMap key (and file name) of the rendered test configuration
pub const CONFIG_KEY: &str = "config.toml";

/// Directory the config ConfigMap is mounted at
pub const CONFIG_MOUNT_DIR: &str = "/etc/vip";

const CONFIG_VOLUME: &str = "vip-config";

/// Label identifying VIP-owned resources
pub const APP_LABEL: &str = "app.kubernetes.io/name";

/// Label carrying the run's job name
pub const RUN_LABEL: &str = "vip.dev/run";

/// Path the test suite reads its configuration from
pub fn config_path() -> String {
    format!("{}/{}", CONFIG_MOUNT_DIR, CONFIG_KEY)
}

/// Test-suite arguments: config path, plus a marker filter when a category is given
pub fn test_args(config_path: &str, category: &str) -> Vec<String> {
    let mut args = vec!["--vip-config".to_string(), config_path.to_string()];
    if !category.is_empty() {
        args.push("-m".to_string());
        args.push(category.to_string());
    }
    args
}

/// What to run, created once per remote run and immutable after submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Job name
    pub name: String,
    /// ConfigMap holding the rendered configuration
    pub config_map: String,
    /// Secret holding the test credentials
    pub credential_secret: String,
    /// Namespace everything lives in
    pub namespace: String,
    /// Test-suite image
    pub image: String,
    /// Test category filter; empty runs everything
    pub category: String,
    /// Active deadline of the job
    pub deadline: Duration,
    /// Whether the credential secret exists and should be injected
    pub credentials_available: bool,
}

/// Pod-level knobs that are the same for every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// CPU request
    pub cpu_request: String,
    /// Memory request
    pub memory_request: String,
    /// CPU limit
    pub cpu_limit: String,
    /// Memory limit
    pub memory_limit: String,
    /// Service account the pod runs as (namespace default if unset)
    pub service_account: Option<String>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            cpu_request: "250m".to_string(),
            memory_request: "512Mi".to_string(),
            cpu_limit: "1".to_string(),
            memory_limit: "2Gi".to_string(),
            service_account: None,
        }
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resources(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

/// Build the Job for a run.
///
/// The job never restarts its pod and tolerates no retries: a failed test
/// run has to be looked at, not rerun.
pub fn compile_job(descriptor: &JobDescriptor, settings: &JobSettings) -> Result<Job> {
    if descriptor.name.is_empty() {
        return Err(Error::config("job name is empty"));
    }
    if descriptor.image.trim().is_empty() {
        return Err(Error::config("test image is empty"));
    }

    let labels = BTreeMap::from([
        (APP_LABEL.to_string(), CONTAINER_NAME.to_string()),
        (RUN_LABEL.to_string(), descriptor.name.clone()),
    ]);

    // Credentials are injected by reference; the submitted spec never holds them
    let env = descriptor.credentials_available.then(|| {
        vec![
            secret_env(
                TEST_USERNAME_ENV,
                &descriptor.credential_secret,
                SECRET_USERNAME_KEY,
            ),
            secret_env(
                TEST_PASSWORD_ENV,
                &descriptor.credential_secret,
                SECRET_PASSWORD_KEY,
            ),
        ]
    });

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(descriptor.image.clone()),
        args: Some(test_args(&config_path(), &descriptor.category)),
        env,
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(resources(&settings.cpu_request, &settings.memory_request)),
            limits: Some(resources(&settings.cpu_limit, &settings.memory_limit)),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        restart_policy: Some("Never".to_string()),
        service_account_name: settings.service_account.clone(),
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: descriptor.config_map.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(descriptor.name.clone()),
            namespace: Some(descriptor.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(descriptor.deadline.as_secs().max(1) as i64),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}
