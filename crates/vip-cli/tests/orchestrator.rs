//! End-to-end run scenarios against mocked collaborators
//!
//! These drive `Orchestrator::run` through whole runs and check which
//! cluster and identity-provider calls were made, and how often.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use k8s_openapi::api::batch::v1::Job;
use mockall::mock;
use mockall::predicate::eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use vip_cli::local::{LocalInvocation, TestRunner};
use vip_cli::run::{Orchestrator, RunMode, RunOutcome, RunSettings, SiteSource};
use vip_common::control_plane::MockControlPlane;
use vip_common::site::SiteRef;
use vip_common::status::JobStatus;
use vip_common::{ControlPlane, Error, Result};
use vip_identity::keycloak::MockIdentityProvider;

// Local mock for TestRunner since the mockall-generated mock is only
// available within the vip-cli crate's test configuration
mock! {
    pub TestRunner {}

    #[async_trait::async_trait]
    impl TestRunner for TestRunner {
        async fn run(&self, invocation: &LocalInvocation, cancel: &CancellationToken) -> Result<()>;
    }
}

const NAMESPACE: &str = "vip";

fn site(auth_enabled: bool) -> serde_json::Value {
    json!({
        "apiVersion": "vip.dev/v1",
        "kind": "Site",
        "metadata": {"name": "acme", "namespace": NAMESPACE},
        "spec": {
            "domain": "acme.example.com",
            "products": {"chat": {"enabled": true}},
            "auth": {"enabled": auth_enabled}
        }
    })
}

fn remote_settings() -> RunSettings {
    let mut settings = RunSettings::new(
        "acme-prod",
        SiteSource::Cluster(SiteRef::new("acme", NAMESPACE)),
        RunMode::Remote {
            image: "ghcr.io/acme/vip-tests:1.4.2".to_string(),
        },
    );
    settings.namespace = NAMESPACE.to_string();
    settings
}

/// Control plane that serves the site and records the submitted config and job
struct Recorded {
    config: Arc<Mutex<Option<(String, String)>>>,
    job: Arc<Mutex<Option<Job>>>,
}

fn submitting_control_plane(auth_enabled: bool) -> (MockControlPlane, Recorded) {
    let recorded = Recorded {
        config: Arc::new(Mutex::new(None)),
        job: Arc::new(Mutex::new(None)),
    };
    let mut cp = MockControlPlane::new();
    cp.expect_get_site()
        .times(1)
        .returning(move |_| Ok(site(auth_enabled)));

    let config = recorded.config.clone();
    cp.expect_apply_config_map()
        .withf(|ns, _, key, _| ns == NAMESPACE && key == "config.toml")
        .times(1)
        .returning(move |_, name, _, data| {
            *config.lock().unwrap() = Some((name.to_string(), data.to_string()));
            Ok(())
        });

    let job = recorded.job.clone();
    cp.expect_create_job().times(1).returning(move |_, j| {
        *job.lock().unwrap() = Some(j.clone());
        Ok(())
    });
    (cp, recorded)
}

fn expect_cleanup_once(cp: &mut MockControlPlane) {
    cp.expect_delete_job()
        .withf(|ns, name| ns == NAMESPACE && name.starts_with("vip-acme-prod-job-"))
        .times(1)
        .returning(|_, _| Ok(()));
    cp.expect_delete_config_map()
        .withf(|ns, name| ns == NAMESPACE && name.starts_with("vip-acme-prod-config-"))
        .times(1)
        .returning(|_, _| Ok(()));
}

fn expect_running_pod(cp: &mut MockControlPlane) {
    cp.expect_find_job_pod()
        .returning(|_, job| Ok(Some(format!("{}-x7k2p", job))));
    cp.expect_follow_pod_logs().returning(|_, _| Ok(()));
}

#[tokio::test(start_paused = true)]
async fn site_without_identity_provider_skips_credentials() {
    let (mut cp, recorded) = submitting_control_plane(false);
    expect_running_pod(&mut cp);
    cp.expect_job_status()
        .returning(|_, _| Ok(JobStatus::from_strings("True", "")));
    expect_cleanup_once(&mut cp);
    cp.expect_secret_exists().never();
    cp.expect_get_secret().never();
    cp.expect_apply_secret().never();
    // No expectations: any identity-provider call fails the test
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let outcome = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Passed);

    let (_, config) = recorded.config.lock().unwrap().clone().unwrap();
    let config: toml::Value = toml::from_str(&config).unwrap();
    assert_eq!(config["products"]["chat"]["enabled"].as_bool(), Some(true));
    assert_eq!(
        config["products"]["chat"]["url"].as_str(),
        Some("https://chat.acme.example.com")
    );
    assert_eq!(config["auth"]["enabled"].as_bool(), Some(false));

    let job = recorded.job.lock().unwrap().clone().unwrap();
    let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
    assert!(container.env.is_none());
}

#[tokio::test(start_paused = true)]
async fn remote_success_cleans_up_job_and_config_once() {
    let (mut cp, recorded) = submitting_control_plane(true);
    cp.expect_secret_exists()
        .with(eq(NAMESPACE), eq("vip-test-credentials"))
        .returning(|_, _| Ok(true));
    cp.expect_apply_secret().never();
    expect_running_pod(&mut cp);
    let polls = Arc::new(Mutex::new(0u32));
    let p = polls.clone();
    cp.expect_job_status().returning(move |_, _| {
        let mut n = p.lock().unwrap();
        *n += 1;
        Ok(if *n < 3 {
            JobStatus::from_strings("", "")
        } else {
            JobStatus::from_strings("True", "")
        })
    });
    expect_cleanup_once(&mut cp);
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let outcome = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Passed);
    assert_eq!(*polls.lock().unwrap(), 3);

    // Job references the config map it was given and the reused credential secret
    let (config_map, _) = recorded.config.lock().unwrap().clone().unwrap();
    let job = recorded.job.lock().unwrap().clone().unwrap();
    let pod = job.spec.unwrap().template.spec.unwrap();
    let volume = &pod.volumes.unwrap()[0];
    assert_eq!(volume.config_map.as_ref().unwrap().name, config_map);
    let env = pod.containers[0].env.clone().unwrap();
    assert!(env.iter().all(|e| e.value.is_none()));
    assert_eq!(
        env[0]
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .map(|s| s.name.as_str()),
        Some("vip-test-credentials")
    );
}

#[tokio::test(start_paused = true)]
async fn first_run_provisions_identity_before_submitting() {
    let (mut cp, _recorded) = submitting_control_plane(true);
    cp.expect_secret_exists().returning(|_, _| Ok(false));
    cp.expect_get_secret()
        .with(eq(NAMESPACE), eq("keycloak-initial-admin"))
        .returning(|_, _| {
            Ok(Some(BTreeMap::from([
                ("username".to_string(), "admin".to_string()),
                ("password".to_string(), "hunter2".to_string()),
            ])))
        });
    cp.expect_apply_secret()
        .withf(|ns, name, data| {
            ns == NAMESPACE
                && name == "vip-test-credentials"
                && data.get("username").map(String::as_str) == Some("vip-tester")
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    expect_running_pod(&mut cp);
    cp.expect_job_status()
        .returning(|_, _| Ok(JobStatus::from_strings("True", "")));
    expect_cleanup_once(&mut cp);

    let mut idp = MockIdentityProvider::new();
    idp.expect_admin_token()
        .withf(|url, _, _| url == "https://auth.acme.example.com")
        .times(1)
        .returning(|_, _, _| Ok("tok".to_string()));
    idp.expect_find_user().returning(|_, _, _, _| Ok(None));
    idp.expect_create_user()
        .withf(|_, _, realm, user, _| realm == "vip" && user == "vip-tester")
        .times(1)
        .returning(|_, _, _, _, _| Ok(()));
    let runner = MockTestRunner::new();

    Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn submission_failure_still_cleans_up() {
    let mut cp = MockControlPlane::new();
    cp.expect_get_site().returning(|_| Ok(site(false)));
    cp.expect_apply_config_map().times(1).returning(|_, _, _, _| Ok(()));
    cp.expect_create_job()
        .times(1)
        .returning(|_, _| Err(Error::control_plane("create job", "admission webhook denied")));
    cp.expect_find_job_pod().never();
    expect_cleanup_once(&mut cp);
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ControlPlane { .. }));
}

#[tokio::test(start_paused = true)]
async fn cleanup_failure_does_not_mask_success() {
    let (mut cp, _recorded) = submitting_control_plane(false);
    expect_running_pod(&mut cp);
    cp.expect_job_status()
        .returning(|_, _| Ok(JobStatus::from_strings("True", "")));
    cp.expect_delete_job()
        .times(1)
        .returning(|_, _| Err(Error::control_plane("delete job", "forbidden")));
    cp.expect_delete_config_map().times(1).returning(|_, _| Ok(()));
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let outcome = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Passed);
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_status_poll_is_timeout_class() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let (mut cp, _recorded) = submitting_control_plane(false);
    cp.expect_find_job_pod()
        .returning(|_, _| Ok(Some("pod".to_string())));
    // Operator hits Ctrl-C while the output is streaming
    cp.expect_follow_pod_logs().returning(move |_, _| {
        trigger.cancel();
        Ok(())
    });
    cp.expect_job_status().never();
    expect_cleanup_once(&mut cp);
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let start = tokio::time::Instant::now();
    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.exit_code(), 3);
    assert!(start.elapsed() < std::time::Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn image_pull_failure_aborts_without_waiting_for_completion() {
    let (mut cp, _recorded) = submitting_control_plane(false);
    cp.expect_find_job_pod()
        .returning(|_, _| Ok(Some("pod".to_string())));
    cp.expect_follow_pod_logs().returning(|_, pod| {
        Err(Error::ImagePull {
            pod: pod.to_string(),
            reason: "ImagePullBackOff: manifest unknown".to_string(),
        })
    });
    cp.expect_job_status().never();
    expect_cleanup_once(&mut cp);
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_image_pull());
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test(start_paused = true)]
async fn failed_job_is_observed_failure() {
    let (mut cp, _recorded) = submitting_control_plane(false);
    expect_running_pod(&mut cp);
    cp.expect_job_status()
        .returning(|_, _| Ok(JobStatus::from_strings("False", "True")));
    expect_cleanup_once(&mut cp);
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::JobFailed { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_job_times_out_and_cleans_up() {
    let (mut cp, _recorded) = submitting_control_plane(false);
    expect_running_pod(&mut cp);
    cp.expect_job_status()
        .returning(|_, _| Ok(JobStatus::from_strings("", "")));
    expect_cleanup_once(&mut cp);
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let mut settings = remote_settings();
    settings.observer.job_timeout = std::time::Duration::from_secs(120);

    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&settings, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn missing_site_fails_before_any_mutation() {
    let mut cp = MockControlPlane::new();
    cp.expect_get_site()
        .returning(|_| Err(Error::config("Site vip/acme not found")));
    cp.expect_apply_config_map().never();
    cp.expect_create_job().never();
    cp.expect_delete_job().never();
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

/// Control plane whose config upload never completes
#[derive(Default)]
struct StalledUpload {
    deleted_jobs: AtomicU32,
    deleted_config_maps: AtomicU32,
}

#[async_trait::async_trait]
impl ControlPlane for StalledUpload {
    async fn get_site(&self, _: &SiteRef) -> Result<serde_json::Value> {
        Ok(site(false))
    }
    async fn apply_config_map(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
        std::future::pending().await
    }
    async fn secret_exists(&self, _: &str, _: &str) -> Result<bool> {
        unreachable!("no identity provider on this site")
    }
    async fn get_secret(&self, _: &str, _: &str) -> Result<Option<BTreeMap<String, String>>> {
        unreachable!("no identity provider on this site")
    }
    async fn apply_secret(&self, _: &str, _: &str, _: BTreeMap<String, String>) -> Result<()> {
        unreachable!("no identity provider on this site")
    }
    async fn create_job(&self, _: &str, _: &Job) -> Result<()> {
        unreachable!("job submitted after cancellation")
    }
    async fn find_job_pod(&self, _: &str, _: &str) -> Result<Option<String>> {
        unreachable!("job observed after cancellation")
    }
    async fn follow_pod_logs(&self, _: &str, _: &str) -> Result<()> {
        unreachable!("job observed after cancellation")
    }
    async fn job_status(&self, _: &str, _: &str) -> Result<JobStatus> {
        unreachable!("job observed after cancellation")
    }
    async fn delete_job(&self, _: &str, _: &str) -> Result<()> {
        self.deleted_jobs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn delete_config_map(&self, _: &str, _: &str) -> Result<()> {
        self.deleted_config_maps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_stalled_upload_returns_and_cleans_up() {
    let cp = StalledUpload::default();
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.exit_code(), 3);
    assert!(start.elapsed() < std::time::Duration::from_secs(2));
    assert_eq!(cp.deleted_jobs.load(Ordering::SeqCst), 1);
    assert_eq!(cp.deleted_config_maps.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_touches_nothing() {
    // No expectations: any control-plane call fails the test
    let cp = MockControlPlane::new();
    let idp = MockIdentityProvider::new();
    let runner = MockTestRunner::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Orchestrator::new(&cp, &idp, &runner)
        .run(&remote_settings(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { .. }));
}
