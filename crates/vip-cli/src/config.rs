//! Test-suite configuration rendered from a site descriptor
//!
//! The suite reads a TOML file with one section per concern:
//!
//! ```toml
//! [general]
//! deployment = "acme-prod"
//! site = "acme"
//! namespace = "vip"
//! domain = "acme.example.com"
//!
//! [products.chat]
//! enabled = true
//! url = "https://chat.acme.example.com"
//!
//! [auth]
//! enabled = true
//! provider = "keycloak"
//! url = "https://auth.acme.example.com"
//! realm = "vip"
//! username = "vip-tester"
//!
//! [email]
//! enabled = false
//!
//! [monitoring]
//! enabled = true
//!
//! [security]
//! policy_enforced = false
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use vip_common::site::SiteDescriptor;
use vip_common::{Error, Result};

/// Run-specific values that don't come from the site descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigContext {
    /// Deployment name the run is verifying
    pub deployment: String,
    /// Namespace the run executes in
    pub namespace: String,
    /// Identity-provider base URL, if one could be resolved
    pub identity_provider_url: Option<String>,
    /// Realm of the test user
    pub realm: String,
    /// Test username
    pub username: String,
}

#[derive(Serialize)]
struct TestConfig<'a> {
    general: General<'a>,
    products: BTreeMap<&'a str, Product>,
    auth: Auth<'a>,
    email: Toggle,
    monitoring: Toggle,
    security: Security,
}

#[derive(Serialize)]
struct General<'a> {
    deployment: &'a str,
    site: &'a str,
    namespace: &'a str,
    domain: &'a str,
}

#[derive(Serialize)]
struct Product {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize)]
struct Auth<'a> {
    enabled: bool,
    provider: &'a str,
    url: &'a str,
    realm: &'a str,
    username: &'a str,
}

#[derive(Serialize)]
struct Toggle {
    enabled: bool,
}

#[derive(Serialize)]
struct Security {
    policy_enforced: bool,
}

/// Render the test-suite configuration for `site`.
///
/// Output is deterministic: products are emitted in name order.
pub fn render_test_config(site: &SiteDescriptor, context: &ConfigContext) -> Result<String> {
    let products = site
        .products
        .iter()
        .map(|(name, spec)| {
            (
                name.as_str(),
                Product {
                    enabled: spec.enabled,
                    url: site.product_url(name),
                },
            )
        })
        .collect();

    let config = TestConfig {
        general: General {
            deployment: &context.deployment,
            site: &site.name,
            namespace: &context.namespace,
            domain: &site.domain,
        },
        products,
        auth: Auth {
            enabled: site.identity_provider_enabled(),
            provider: site
                .auth
                .as_ref()
                .map(|a| a.provider.as_str())
                .unwrap_or("keycloak"),
            url: context.identity_provider_url.as_deref().unwrap_or_default(),
            realm: &context.realm,
            username: &context.username,
        },
        email: Toggle {
            enabled: site.email.is_some_and(|e| e.enabled),
        },
        monitoring: Toggle {
            enabled: site.monitoring.is_some_and(|m| m.enabled),
        },
        security: Security {
            policy_enforced: site.security.is_some_and(|s| s.policy_enforced),
        },
    };

    toml::to_string(&config)
        .map_err(|e| Error::serialization(format!("failed to render test config: {}", e)))
}
