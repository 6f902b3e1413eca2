//! Run orchestration
//!
//! A run fetches the site descriptor, renders the test configuration,
//! provisions the test identity when the site has an identity provider, and
//! then executes the suite either locally or as a cluster job. Remote runs
//! always clean up their ephemeral resources, whatever the outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vip_common::naming::ResourceNames;
use vip_common::poll::with_cancel;
use vip_common::site::{SiteDescriptor, SiteRef};
use vip_common::{ControlPlane, Error, Result};
use vip_identity::provision::{
    DEFAULT_ADMIN_SECRET, DEFAULT_CREDENTIAL_SECRET, DEFAULT_REALM, DEFAULT_TEST_USER,
};
use vip_identity::{ensure_test_identity, read_credentials, IdentityProvider, IdentityRequest};
use vip_job::compiler::CONFIG_KEY;
use vip_job::{cleanup, compile_job, observe_job, JobDescriptor, JobSettings, ObserverSettings};

use crate::config::{render_test_config, ConfigContext};
use crate::local::{LocalInvocation, TestRunner};

/// Where the site descriptor comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteSource {
    /// A custom resource in the cluster
    Cluster(SiteRef),
    /// A YAML manifest on disk
    File(PathBuf),
}

/// How the suite is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Submit a batch job running `image`
    Remote {
        /// Test-suite image
        image: String,
    },
    /// Run the suite on this machine
    Local,
    /// Only render the configuration, to `output` or stdout
    ConfigOnly {
        /// File to write the configuration to
        output: Option<PathBuf>,
    },
}

/// Everything a run needs, resolved from flags and environment
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Deployment being verified; also prefixes resource names
    pub deployment: String,
    /// Site descriptor location
    pub site: SiteSource,
    /// Namespace for the job, config map, and secrets
    pub namespace: String,
    /// Test category filter; empty runs everything
    pub category: String,
    /// Execution mode
    pub mode: RunMode,
    /// Identity-provider URL override
    pub identity_provider_url: Option<String>,
    /// Realm override; falls back to the site's realm, then [`DEFAULT_REALM`]
    pub realm: Option<String>,
    /// Test username
    pub test_user: String,
    /// Secret holding the identity provider's admin credentials
    pub admin_secret: String,
    /// Secret the test credentials live in
    pub credential_secret: String,
    /// Observation timeouts
    pub observer: ObserverSettings,
    /// Pod resources for the job
    pub job: JobSettings,
    /// Budget for removing the run's resources
    pub cleanup_timeout: Duration,
}

impl RunSettings {
    /// Settings with defaults for everything but the deployment, site, and mode
    pub fn new(deployment: impl Into<String>, site: SiteSource, mode: RunMode) -> Self {
        Self {
            deployment: deployment.into(),
            site,
            namespace: "default".to_string(),
            category: String::new(),
            mode,
            identity_provider_url: None,
            realm: None,
            test_user: DEFAULT_TEST_USER.to_string(),
            admin_secret: DEFAULT_ADMIN_SECRET.to_string(),
            credential_secret: DEFAULT_CREDENTIAL_SECRET.to_string(),
            observer: ObserverSettings::default(),
            job: JobSettings::default(),
            cleanup_timeout: vip_job::CLEANUP_TIMEOUT,
        }
    }

    fn name_prefix(&self) -> String {
        format!("vip-{}", self.deployment)
    }
}

/// How a run that didn't fail ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Configuration was rendered and nothing was executed
    ConfigRendered(String),
    /// The test suite passed
    Passed,
}

/// Drives a run against its collaborators
pub struct Orchestrator<'a> {
    control_plane: &'a dyn ControlPlane,
    identity: &'a dyn IdentityProvider,
    runner: &'a dyn TestRunner,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator over the given collaborators
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        identity: &'a dyn IdentityProvider,
        runner: &'a dyn TestRunner,
    ) -> Self {
        Self {
            control_plane,
            identity,
            runner,
        }
    }

    /// Execute a run.
    ///
    /// Configuration problems are reported before anything is created in the
    /// cluster. A failed suite is `Error::JobFailed` or `Error::TestsFailed`.
    /// Every collaborator call races `cancel`; a cancelled run makes no
    /// further changes but still removes what it already created.
    pub async fn run(&self, settings: &RunSettings, cancel: &CancellationToken) -> Result<RunOutcome> {
        let site = with_cancel("site lookup", cancel, self.load_site(&settings.site)).await?;
        info!(site = %site.name, domain = %site.domain, products = site.products.len(), "loaded site descriptor");

        let rendered = render_config(&site, settings)?;
        if let RunMode::ConfigOnly { output } = &settings.mode {
            emit_config(output.as_deref(), &rendered).await?;
            return Ok(RunOutcome::ConfigRendered(rendered));
        }

        let needs_identity = site.identity_provider_enabled();
        let provider_url = if needs_identity {
            site.check_identity_provider()?;
            Some(site.identity_provider_url(settings.identity_provider_url.as_deref())?)
        } else {
            None
        };

        // Names are drawn before the first mutation so an unusable random
        // source leaves nothing behind
        let names = match &settings.mode {
            RunMode::Remote { image } if image.trim().is_empty() => {
                return Err(Error::config("remote runs need a test image"))
            }
            RunMode::Remote { .. } => Some(ResourceNames::generate(&settings.name_prefix())?),
            _ => None,
        };

        let credentials_available = match provider_url {
            Some(url) => {
                let request = IdentityRequest {
                    namespace: settings.namespace.clone(),
                    admin_secret: settings.admin_secret.clone(),
                    credential_secret: settings.credential_secret.clone(),
                    provider_url: url,
                    realm: resolve_realm(&site, settings),
                    username: settings.test_user.clone(),
                };
                let created = with_cancel(
                    "test identity provisioning",
                    cancel,
                    ensure_test_identity(self.control_plane, self.identity, &request),
                )
                .await?;
                info!(created, secret = %settings.credential_secret, "test identity ready");
                true
            }
            None => {
                info!("site has no identity provider, running without test credentials");
                false
            }
        };

        match (&settings.mode, names) {
            (RunMode::Remote { image }, Some(names)) => {
                let result = self
                    .run_remote(settings, image, &names, &rendered, credentials_available, cancel)
                    .await;
                cleanup(
                    self.control_plane,
                    &settings.namespace,
                    &names,
                    settings.cleanup_timeout,
                )
                .await;
                result?;
            }
            _ => {
                self.run_local(settings, &rendered, credentials_available, cancel)
                    .await?
            }
        }

        info!(deployment = %settings.deployment, "verification passed");
        Ok(RunOutcome::Passed)
    }

    async fn load_site(&self, source: &SiteSource) -> Result<SiteDescriptor> {
        match source {
            SiteSource::Cluster(site_ref) => {
                let object = self.control_plane.get_site(site_ref).await?;
                SiteDescriptor::from_object(&object)
            }
            SiteSource::File(path) => read_site_file(path).await,
        }
    }

    async fn run_remote(
        &self,
        settings: &RunSettings,
        image: &str,
        names: &ResourceNames,
        rendered: &str,
        credentials_available: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let namespace = settings.namespace.as_str();

        with_cancel(
            "config upload",
            cancel,
            self.control_plane
                .apply_config_map(namespace, &names.config_map, CONFIG_KEY, rendered),
        )
        .await?;

        let descriptor = JobDescriptor {
            name: names.job.clone(),
            config_map: names.config_map.clone(),
            credential_secret: settings.credential_secret.clone(),
            namespace: namespace.to_string(),
            image: image.to_string(),
            category: settings.category.clone(),
            deadline: settings.observer.job_timeout,
            credentials_available,
        };
        let job = compile_job(&descriptor, &settings.job)?;

        with_cancel(
            "job submission",
            cancel,
            self.control_plane.create_job(namespace, &job),
        )
        .await?;

        observe_job(
            self.control_plane,
            namespace,
            &names.job,
            &settings.observer,
            cancel,
        )
        .await
    }

    async fn run_local(
        &self,
        settings: &RunSettings,
        rendered: &str,
        credentials_available: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let credentials = if credentials_available {
            Some(
                with_cancel(
                    "credential lookup",
                    cancel,
                    read_credentials(
                        self.control_plane,
                        &settings.namespace,
                        &settings.credential_secret,
                    ),
                )
                .await?,
            )
        } else {
            None
        };

        let file = tempfile::Builder::new()
            .prefix("vip-config-")
            .suffix(".toml")
            .tempfile()?;
        tokio::fs::write(file.path(), rendered).await?;

        let invocation = LocalInvocation {
            config_path: file.path().to_path_buf(),
            category: settings.category.clone(),
            credentials,
        };
        let result = self.runner.run(&invocation, cancel).await;

        if let Err(e) = file.close() {
            warn!(error = %e, "failed to remove temporary config file");
        }
        result
    }
}

/// Realm for the test user: explicit setting, then the site's, then [`DEFAULT_REALM`]
fn resolve_realm(site: &SiteDescriptor, settings: &RunSettings) -> String {
    settings
        .realm
        .clone()
        .or_else(|| site.identity_provider_realm().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_REALM.to_string())
}

/// Render the test configuration for a run against `site`.
///
/// An identity-provider URL that can't be resolved renders as empty here;
/// runs that need it fail on it later, before touching the cluster.
pub fn render_config(site: &SiteDescriptor, settings: &RunSettings) -> Result<String> {
    let context = ConfigContext {
        deployment: settings.deployment.clone(),
        namespace: settings.namespace.clone(),
        identity_provider_url: site
            .identity_provider_url(settings.identity_provider_url.as_deref())
            .ok(),
        realm: resolve_realm(site, settings),
        username: settings.test_user.clone(),
    };
    render_test_config(site, &context)
}

/// Read a site descriptor from a YAML manifest
pub async fn read_site_file(path: &Path) -> Result<SiteDescriptor> {
    let manifest = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::config(format!("failed to read site file {}: {}", path.display(), e))
    })?;
    SiteDescriptor::from_yaml(&manifest)
}

/// Write rendered configuration to `output`, if given
pub async fn emit_config(output: Option<&Path>, rendered: &str) -> Result<()> {
    if let Some(path) = output {
        tokio::fs::write(path, rendered).await?;
        info!(path = %path.display(), "wrote test configuration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use serde_json::json;
    use vip_common::control_plane::MockControlPlane;
    use vip_identity::keycloak::MockIdentityProvider;

    use crate::local::MockTestRunner;

    fn site_object(auth_enabled: bool, domain: &str) -> serde_json::Value {
        json!({
            "metadata": {"name": "acme"},
            "spec": {
                "domain": domain,
                "products": {"chat": {"enabled": true}},
                "auth": {"enabled": auth_enabled}
            }
        })
    }

    fn settings(mode: RunMode) -> RunSettings {
        let mut s = RunSettings::new(
            "acme-prod",
            SiteSource::Cluster(SiteRef::new("acme", "vip")),
            mode,
        );
        s.namespace = "vip".to_string();
        s
    }

    #[tokio::test]
    async fn config_only_renders_without_mutation() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site()
            .returning(|_| Ok(site_object(true, "acme.example.com")));
        let idp = MockIdentityProvider::new();
        let runner = MockTestRunner::new();

        let outcome = Orchestrator::new(&cp, &idp, &runner)
            .run(&settings(RunMode::ConfigOnly { output: None }), &CancellationToken::new())
            .await
            .unwrap();

        let RunOutcome::ConfigRendered(rendered) = outcome else {
            panic!("expected rendered config");
        };
        assert!(rendered.contains("https://chat.acme.example.com"));
        assert!(rendered.contains("https://auth.acme.example.com"));
    }

    #[tokio::test]
    async fn config_only_writes_output_file() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site()
            .returning(|_| Ok(site_object(false, "acme.example.com")));
        let idp = MockIdentityProvider::new();
        let runner = MockTestRunner::new();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vip.toml");

        Orchestrator::new(&cp, &idp, &runner)
            .run(
                &settings(RunMode::ConfigOnly {
                    output: Some(output.clone()),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.contains("[products.chat]"));
    }

    #[tokio::test]
    async fn empty_domain_with_identity_is_config_error_before_mutation() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site().returning(|_| Ok(site_object(true, "")));
        cp.expect_secret_exists().never();
        cp.expect_apply_config_map().never();
        cp.expect_create_job().never();
        let idp = MockIdentityProvider::new();
        let runner = MockTestRunner::new();

        let err = Orchestrator::new(&cp, &idp, &runner)
            .run(
                &settings(RunMode::Remote {
                    image: "vip:1".to_string(),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn unsupported_identity_provider_is_config_error_before_mutation() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site().returning(|_| {
            let mut object = site_object(true, "acme.example.com");
            object["spec"]["auth"]["provider"] = json!("okta");
            Ok(object)
        });
        cp.expect_secret_exists().never();
        cp.expect_apply_config_map().never();
        cp.expect_create_job().never();
        // No expectations: any identity-provider call fails the test
        let idp = MockIdentityProvider::new();
        let runner = MockTestRunner::new();

        let err = Orchestrator::new(&cp, &idp, &runner)
            .run(
                &settings(RunMode::Remote {
                    image: "vip:1".to_string(),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn remote_without_image_is_config_error() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site()
            .returning(|_| Ok(site_object(false, "acme.example.com")));
        cp.expect_apply_config_map().never();
        let idp = MockIdentityProvider::new();
        let runner = MockTestRunner::new();

        let err = Orchestrator::new(&cp, &idp, &runner)
            .run(
                &settings(RunMode::Remote {
                    image: String::new(),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn local_run_passes_credentials_to_runner() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site()
            .returning(|_| Ok(site_object(true, "acme.example.com")));
        cp.expect_secret_exists().returning(|_, _| Ok(true));
        cp.expect_get_secret()
            .withf(|_, name| name == DEFAULT_CREDENTIAL_SECRET)
            .returning(|_, _| {
                Ok(Some(BTreeMap::from([
                    ("username".to_string(), "vip-tester".to_string()),
                    ("password".to_string(), "s3cret".to_string()),
                ])))
            });
        let idp = MockIdentityProvider::new();

        let mut runner = MockTestRunner::new();
        runner
            .expect_run()
            .withf(|inv, _| {
                inv.config_path.exists()
                    && inv
                        .credentials
                        .as_ref()
                        .is_some_and(|c| c.username == "vip-tester" && c.password == "s3cret")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = Orchestrator::new(&cp, &idp, &runner)
            .run(&settings(RunMode::Local), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Passed);
    }

    #[tokio::test]
    async fn local_failure_propagates() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site()
            .returning(|_| Ok(site_object(false, "acme.example.com")));
        let idp = MockIdentityProvider::new();
        let mut runner = MockTestRunner::new();
        runner.expect_run().returning(|inv, _| {
            assert!(inv.credentials.is_none());
            Err(Error::TestsFailed {
                status: "exit status: 1".to_string(),
            })
        });

        let err = Orchestrator::new(&cp, &idp, &runner)
            .run(&settings(RunMode::Local), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn site_realm_is_used_when_not_overridden() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_site().returning(|_| {
            Ok(json!({
                "metadata": {"name": "acme"},
                "spec": {
                    "domain": "acme.example.com",
                    "auth": {"enabled": true, "realm": "acme-realm"}
                }
            }))
        });
        let idp = MockIdentityProvider::new();
        let runner = MockTestRunner::new();

        let outcome = Orchestrator::new(&cp, &idp, &runner)
            .run(&settings(RunMode::ConfigOnly { output: None }), &CancellationToken::new())
            .await
            .unwrap();
        let RunOutcome::ConfigRendered(rendered) = outcome else {
            panic!("expected rendered config");
        };
        assert!(rendered.contains("realm = \"acme-realm\""));
    }
}
