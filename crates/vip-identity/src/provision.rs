//! Idempotent provisioning of the ephemeral test identity
//!
//! The credential secret is the source of truth: once it exists, later runs
//! reuse it and never touch the identity provider. Otherwise the test user is
//! created (or its password reset) and the resulting pair is written to the
//! secret.

use tracing::{info, warn};

use vip_common::{ControlPlane, Error, Result};

use crate::credentials::{read_credentials, CredentialSecret};
use crate::keycloak::IdentityProvider;
use crate::password::generate_password;

/// Secret the identity provider's operator writes its bootstrap admin into
pub const DEFAULT_ADMIN_SECRET: &str = "keycloak-initial-admin";

/// Secret the test credentials are stored in
pub const DEFAULT_CREDENTIAL_SECRET: &str = "vip-test-credentials";

/// Realm test users are created in
pub const DEFAULT_REALM: &str = "vip";

/// Username of the test user
pub const DEFAULT_TEST_USER: &str = "vip-tester";

/// Everything needed to ensure the test identity exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest {
    /// Namespace holding both the admin and the credential secret
    pub namespace: String,
    /// Secret holding the provider's admin username/password
    pub admin_secret: String,
    /// Secret the test credentials are written to
    pub credential_secret: String,
    /// Identity provider base URL
    pub provider_url: String,
    /// Realm the test user belongs to
    pub realm: String,
    /// Test username
    pub username: String,
}

impl IdentityRequest {
    /// Request using the well-known secret names, realm, and username
    pub fn new(namespace: impl Into<String>, provider_url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            admin_secret: DEFAULT_ADMIN_SECRET.to_string(),
            credential_secret: DEFAULT_CREDENTIAL_SECRET.to_string(),
            provider_url: provider_url.into(),
            realm: DEFAULT_REALM.to_string(),
            username: DEFAULT_TEST_USER.to_string(),
        }
    }
}

/// Make sure the test identity and its credential secret exist.
///
/// Returns `true` if the identity was provisioned by this call and `false` if
/// the credential secret already existed, in which case the identity provider
/// is not contacted at all.
pub async fn ensure_test_identity(
    control_plane: &dyn ControlPlane,
    provider: &dyn IdentityProvider,
    request: &IdentityRequest,
) -> Result<bool> {
    let namespace = request.namespace.as_str();

    if control_plane
        .secret_exists(namespace, &request.credential_secret)
        .await?
    {
        info!(
            namespace,
            secret = %request.credential_secret,
            "credential secret already exists, reusing it"
        );
        return Ok(false);
    }

    let admin = read_credentials(control_plane, namespace, &request.admin_secret).await?;
    let token = provider
        .admin_token(&request.provider_url, &admin.username, &admin.password)
        .await?;

    let password = generate_password()?;
    upsert_user(provider, request, &token, &password).await?;

    let credentials = CredentialSecret {
        username: request.username.clone(),
        password,
    };
    control_plane
        .apply_secret(namespace, &request.credential_secret, credentials.into_data())
        .await?;

    info!(
        namespace,
        secret = %request.credential_secret,
        user = %request.username,
        realm = %request.realm,
        "provisioned test identity"
    );
    Ok(true)
}

/// Reset the user's password if it exists, otherwise create it.
///
/// A failed search doesn't stop creation. A create that conflicts with a user
/// created concurrently falls back to searching again and resetting.
async fn upsert_user(
    provider: &dyn IdentityProvider,
    request: &IdentityRequest,
    token: &str,
    password: &str,
) -> Result<()> {
    let url = request.provider_url.as_str();
    let realm = request.realm.as_str();
    let username = request.username.as_str();

    let existing = match provider.find_user(url, token, realm, username).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, user = %username, "user search failed, attempting to create");
            None
        }
    };

    if let Some(id) = existing {
        info!(user = %username, "test user exists, resetting password");
        return provider
            .reset_password(url, token, realm, &id, password)
            .await;
    }

    match provider
        .create_user(url, token, realm, username, password)
        .await
    {
        Ok(()) => {
            info!(user = %username, realm, "created test user");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            info!(user = %username, "test user created concurrently, resetting password");
            let id = provider
                .find_user(url, token, realm, username)
                .await?
                .ok_or_else(|| {
                    Error::identity(
                        "create user",
                        format!(
                            "user {} reported as existing in realm {} but not found",
                            username, realm
                        ),
                    )
                })?;
            provider
                .reset_password(url, token, realm, &id, password)
                .await
        }
        Err(e) => Err(e),
    }
}
