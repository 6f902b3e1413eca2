//! `vip run` / `vip render`
//!
//! # Usage
//!
//! ```bash
//! # Run the suite in the cluster
//! vip run --deployment acme-prod --namespace vip --image ghcr.io/acme/vip-tests:1.4.2
//!
//! # Only the smoke tests, from this machine
//! vip run --deployment acme-prod --namespace vip --local --category smoke
//!
//! # Render the configuration for a site manifest that isn't applied yet
//! vip render --deployment acme-prod --site-file site.yaml --output vip.toml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;

use vip_common::site::{SiteRef, DEFAULT_SITE_API_VERSION, DEFAULT_SITE_KIND};
use vip_common::{Error, Result};
use vip_identity::provision::{DEFAULT_ADMIN_SECRET, DEFAULT_CREDENTIAL_SECRET, DEFAULT_TEST_USER};
use vip_identity::KeycloakClient;
use vip_job::ObserverSettings;

use crate::duration::parse_duration;
use crate::local::{ProcessRunner, DEFAULT_LOCAL_RUNNER};
use crate::run::{
    emit_config, read_site_file, render_config, Orchestrator, RunMode, RunOutcome, RunSettings,
    SiteSource,
};
use crate::GlobalArgs;

/// Verify a deployed site
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Deployment being verified
    #[arg(long, env = "VIP_DEPLOYMENT")]
    pub deployment: String,

    /// Name of the site resource (defaults to the deployment name)
    #[arg(long, env = "VIP_SITE")]
    pub site: Option<String>,

    /// Read the site resource from a YAML manifest instead of the cluster
    #[arg(long, env = "VIP_SITE_FILE", conflicts_with = "site")]
    pub site_file: Option<PathBuf>,

    /// Namespace for the site resource, the job, and the credential secrets
    #[arg(long, short = 'n', env = "VIP_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Only run tests in this category
    #[arg(long, env = "VIP_CATEGORY", default_value = "")]
    pub category: String,

    /// Run the suite on this machine instead of in the cluster
    #[arg(long, env = "VIP_LOCAL")]
    pub local: bool,

    /// Render the test configuration and stop
    #[arg(long, env = "VIP_CONFIG_ONLY")]
    pub config_only: bool,

    /// Write the rendered configuration here instead of stdout (with --config-only)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Test-suite image for cluster runs
    #[arg(long, env = "VIP_IMAGE")]
    pub image: Option<String>,

    /// Identity provider base URL (defaults to https://auth.<site domain>)
    #[arg(long, env = "VIP_IDP_URL")]
    pub idp_url: Option<String>,

    /// Realm of the test user (defaults to the site's realm, then "vip")
    #[arg(long, env = "VIP_REALM")]
    pub realm: Option<String>,

    /// Username of the test user
    #[arg(long, env = "VIP_TEST_USER", default_value = DEFAULT_TEST_USER)]
    pub test_user: String,

    /// Secret holding the identity provider's admin credentials
    #[arg(long, env = "VIP_ADMIN_SECRET", default_value = DEFAULT_ADMIN_SECRET)]
    pub admin_secret: String,

    /// Secret the test credentials are stored in
    #[arg(long, env = "VIP_CREDENTIAL_SECRET", default_value = DEFAULT_CREDENTIAL_SECRET)]
    pub credential_secret: String,

    /// Overall job timeout (e.g. 15m, 1h)
    #[arg(long, env = "VIP_TIMEOUT", default_value = "15m", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Test runner for local runs
    #[arg(long, env = "VIP_LOCAL_RUNNER", default_value = DEFAULT_LOCAL_RUNNER)]
    pub local_runner: String,

    /// apiVersion of the site custom resource
    #[arg(long, env = "VIP_SITE_API_VERSION", default_value = DEFAULT_SITE_API_VERSION)]
    pub site_api_version: String,

    /// Kind of the site custom resource
    #[arg(long, env = "VIP_SITE_KIND", default_value = DEFAULT_SITE_KIND)]
    pub site_kind: String,
}

impl RunArgs {
    /// Resolve flags into run settings
    pub fn settings(&self) -> Result<RunSettings> {
        if self.deployment.trim().is_empty() {
            return Err(Error::config("--deployment must not be empty"));
        }

        let site = match &self.site_file {
            Some(path) => SiteSource::File(path.clone()),
            None => SiteSource::Cluster(SiteRef {
                api_version: self.site_api_version.clone(),
                kind: self.site_kind.clone(),
                name: self
                    .site
                    .clone()
                    .unwrap_or_else(|| self.deployment.clone()),
                namespace: self.namespace.clone(),
            }),
        };

        let mode = if self.config_only {
            RunMode::ConfigOnly {
                output: self.output.clone(),
            }
        } else if self.local {
            RunMode::Local
        } else {
            let image = self
                .image
                .clone()
                .ok_or_else(|| Error::config("--image is required unless --local or --config-only is set"))?;
            RunMode::Remote { image }
        };

        let mut settings = RunSettings::new(&self.deployment, site, mode);
        settings.namespace = self.namespace.clone();
        settings.category = self.category.clone();
        settings.identity_provider_url = self.idp_url.clone();
        settings.realm = self.realm.clone();
        settings.test_user = self.test_user.clone();
        settings.admin_secret = self.admin_secret.clone();
        settings.credential_secret = self.credential_secret.clone();
        settings.observer = ObserverSettings {
            job_timeout: self.timeout,
            ..Default::default()
        };
        Ok(settings)
    }
}

/// Run the run/render command.
pub async fn run(args: RunArgs, global: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let settings = args.settings()?;

    // A manifest on disk renders without a cluster connection
    if let (SiteSource::File(path), RunMode::ConfigOnly { output }) = (&settings.site, &settings.mode) {
        let site = read_site_file(path).await?;
        let rendered = render_config(&site, &settings)?;
        emit_config(output.as_deref(), &rendered).await?;
        if output.is_none() {
            print!("{}", rendered);
        }
        return Ok(());
    }

    let control_plane = super::control_plane(&global.client_options()).await?;
    let identity = KeycloakClient::new()?;
    let runner = ProcessRunner::new(&args.local_runner);

    let outcome = Orchestrator::new(&control_plane, &identity, &runner)
        .run(&settings, cancel)
        .await?;

    if let (RunOutcome::ConfigRendered(rendered), RunMode::ConfigOnly { output: None }) =
        (&outcome, &settings.mode)
    {
        print!("{}", rendered);
    }
    Ok(())
}
