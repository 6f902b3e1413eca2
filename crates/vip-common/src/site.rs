//! Site descriptor types
//!
//! A site is described by a namespaced custom resource whose `spec` lists the
//! site's domain, its products, and the shared services (identity provider,
//! email, monitoring) the test suite needs to know about. The resource's
//! group/version/kind are configurable, so the descriptor is read as a
//! dynamic object and its `spec` deserialized here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default apiVersion of the site custom resource
pub const DEFAULT_SITE_API_VERSION: &str = "vip.dev/v1";

/// Default kind of the site custom resource
pub const DEFAULT_SITE_KIND: &str = "Site";

/// Identity provider implementation test users can be provisioned in
pub const KEYCLOAK_PROVIDER: &str = "keycloak";

/// Subdomain the identity provider is served from when no override is given
pub const IDENTITY_PROVIDER_SUBDOMAIN: &str = "auth";

/// Location of a site custom resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRef {
    /// `group/version` of the custom resource
    pub api_version: String,
    /// Kind of the custom resource
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Namespace the resource lives in
    pub namespace: String,
}

impl SiteRef {
    /// Reference a site using the default apiVersion and kind
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: DEFAULT_SITE_API_VERSION.to_string(),
            kind: DEFAULT_SITE_KIND.to_string(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Split `api_version` into `(group, version)`; core resources have an empty group
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

/// The parsed `spec` of a site custom resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDescriptor {
    /// Resource name (taken from metadata, not spec)
    #[serde(skip)]
    pub name: String,
    /// Base DNS domain of the site (e.g. `acme.example.com`)
    #[serde(default)]
    pub domain: String,
    /// Products deployed on the site, keyed by product name
    #[serde(default)]
    pub products: BTreeMap<String, ProductSpec>,
    /// Identity provider configuration
    #[serde(default)]
    pub auth: Option<AuthSpec>,
    /// Outbound email
    #[serde(default)]
    pub email: Option<ToggleSpec>,
    /// Monitoring stack
    #[serde(default)]
    pub monitoring: Option<ToggleSpec>,
    /// Security policy settings
    #[serde(default)]
    pub security: Option<SecuritySpec>,
}

/// A product deployed on the site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSpec {
    /// Whether the product is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Explicit host; defaults to `<product>.<domain>`
    #[serde(default)]
    pub host: Option<String>,
}

/// Identity provider settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Whether an identity provider is configured for the site
    #[serde(default)]
    pub enabled: bool,
    /// Provider implementation; runs against anything but [`KEYCLOAK_PROVIDER`]
    /// are rejected before any resource is created
    #[serde(default = "default_auth_provider")]
    pub provider: String,
    /// Realm test users live in, if the site pins one
    #[serde(default)]
    pub realm: Option<String>,
    /// Provider base URL, if it isn't served from the `auth` subdomain
    #[serde(default)]
    pub url: Option<String>,
}

fn default_auth_provider() -> String {
    KEYCLOAK_PROVIDER.to_string()
}

/// A feature that is simply on or off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleSpec {
    /// Whether the feature is enabled
    #[serde(default)]
    pub enabled: bool,
}

/// Security policy settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Whether network/security policies are enforced on the site
    #[serde(default)]
    pub policy_enforced: bool,
}

impl SiteDescriptor {
    /// Parse a site descriptor from a full resource object (`metadata` + `spec`)
    pub fn from_object(object: &serde_json::Value) -> Result<Self> {
        let spec = object
            .get("spec")
            .cloned()
            .ok_or_else(|| Error::config("site resource has no spec"))?;
        let mut site: SiteDescriptor = serde_json::from_value(spec)
            .map_err(|e| Error::config(format!("invalid site spec: {}", e)))?;
        site.name = object
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(site)
    }

    /// Parse a site descriptor from a YAML resource manifest
    pub fn from_yaml(manifest: &str) -> Result<Self> {
        let object: serde_json::Value = serde_yaml::from_str(manifest)?;
        Self::from_object(&object)
    }

    /// Whether the site declares an enabled identity provider
    pub fn identity_provider_enabled(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| a.enabled)
    }

    /// Public URL of a product: its explicit host, else `<product>.<domain>`.
    ///
    /// Returns `None` when neither a host nor a domain is available.
    pub fn product_url(&self, name: &str) -> Option<String> {
        let product = self.products.get(name)?;
        match product.host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => Some(format!("https://{}", host)),
            None if !self.domain.is_empty() => Some(format!("https://{}.{}", name, self.domain)),
            None => None,
        }
    }

    /// Realm declared by the site's auth block, if any
    pub fn identity_provider_realm(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .and_then(|a| a.realm.as_deref())
            .filter(|r| !r.is_empty())
    }

    /// Resolve the identity-provider base URL.
    ///
    /// An explicit override wins, then a URL declared in the site's auth
    /// block. Otherwise the URL is derived from the site domain; an empty
    /// domain is a configuration error rather than a malformed URL.
    pub fn identity_provider_url(&self, override_url: Option<&str>) -> Result<String> {
        let declared = self.auth.as_ref().and_then(|a| a.url.as_deref());
        if let Some(url) = override_url.or(declared).filter(|u| !u.is_empty()) {
            return Ok(url.trim_end_matches('/').to_string());
        }
        if self.domain.is_empty() {
            return Err(Error::config(format!(
                "site {} has no domain; pass an identity provider URL override",
                self.name
            )));
        }
        Ok(format!(
            "https://{}.{}",
            IDENTITY_PROVIDER_SUBDOMAIN, self.domain
        ))
    }

    /// Fail with a configuration error unless the enabled provider is Keycloak
    pub fn check_identity_provider(&self) -> Result<()> {
        match self.auth.as_ref().filter(|a| a.enabled) {
            Some(auth) if !auth.provider.eq_ignore_ascii_case(KEYCLOAK_PROVIDER) => {
                Err(Error::config(format!(
                    "site {} uses identity provider {:?}; test users can only be provisioned in {}",
                    self.name, auth.provider, KEYCLOAK_PROVIDER
                )))
            }
            _ => Ok(()),
        }
    }
}
