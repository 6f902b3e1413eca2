//! Identity-provider client
//!
//! [`IdentityProvider`] covers the four admin operations test-identity
//! provisioning needs. [`KeycloakClient`] speaks Keycloak's token endpoint and
//! admin REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use vip_common::{Error, Result};

/// Realm admin tokens are always minted against, whatever realm the test user lives in
pub const ADMIN_REALM: &str = "master";

/// Public client Keycloak provisions in the admin realm for CLI access
pub const ADMIN_CLIENT_ID: &str = "admin-cli";

/// Upper bound on every identity-provider request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Admin operations against an identity provider.
///
/// `base_url` is the provider root (e.g. `https://auth.example.com`); every
/// call after [`admin_token`](IdentityProvider::admin_token) authenticates
/// with the returned bearer token.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange admin credentials for an access token in the admin realm
    async fn admin_token(&self, base_url: &str, username: &str, password: &str)
        -> Result<String>;

    /// Find a user by exact username, returning its id
    async fn find_user(
        &self,
        base_url: &str,
        token: &str,
        realm: &str,
        username: &str,
    ) -> Result<Option<String>>;

    /// Create an enabled user with a non-temporary password.
    ///
    /// Fails with a 409 `IdentityProvider` error if the user already exists.
    async fn create_user(
        &self,
        base_url: &str,
        token: &str,
        realm: &str,
        username: &str,
        password: &str,
    ) -> Result<()>;

    /// Replace a user's password
    async fn reset_password(
        &self,
        base_url: &str,
        token: &str,
        realm: &str,
        user_id: &str,
        password: &str,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserRepresentation {
    id: String,
    username: String,
}

/// Keycloak implementation of [`IdentityProvider`]
pub struct KeycloakClient {
    http: reqwest::Client,
}

impl KeycloakClient {
    /// Create a client whose requests time out after [`REQUEST_TIMEOUT`]
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::identity("build http client", e.to_string()))?;
        Ok(Self { http })
    }
}

/// Append path segments to `base_url`, percent-encoding each one
fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::config(format!("invalid identity provider URL {}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::config(format!("identity provider URL {} cannot be a base", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turn a non-success response into an `IdentityProvider` error carrying the status
async fn check_status(
    operation: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::identity_status(
        operation,
        status.as_u16(),
        format!("{}: {}", status, body),
    ))
}

#[async_trait]
impl IdentityProvider for KeycloakClient {
    async fn admin_token(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let url = endpoint(
            base_url,
            &["realms", ADMIN_REALM, "protocol", "openid-connect", "token"],
        )?;
        debug!(%url, "requesting admin token");

        let response = self
            .http
            .post(url.clone())
            .form(&[
                ("grant_type", "password"),
                ("client_id", ADMIN_CLIENT_ID),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await
            .map_err(|e| Error::identity("admin token", format!("{}: {}", url, e)))?;

        let token: TokenResponse = check_status("admin token", response)
            .await?
            .json()
            .await
            .map_err(|e| Error::identity("admin token", format!("invalid token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn find_user(
        &self,
        base_url: &str,
        token: &str,
        realm: &str,
        username: &str,
    ) -> Result<Option<String>> {
        let mut url = endpoint(base_url, &["admin", "realms", realm, "users"])?;
        url.query_pairs_mut()
            .append_pair("username", username)
            .append_pair("exact", "true");

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::identity("find user", format!("{}: {}", url, e)))?;

        let users: Vec<UserRepresentation> = check_status("find user", response)
            .await?
            .json()
            .await
            .map_err(|e| Error::identity("find user", format!("invalid user list: {}", e)))?;

        // Keycloak stores usernames lowercased
        Ok(users
            .into_iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .map(|u| u.id))
    }

    async fn create_user(
        &self,
        base_url: &str,
        token: &str,
        realm: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let url = endpoint(base_url, &["admin", "realms", realm, "users"])?;
        let body = json!({
            "username": username,
            "enabled": true,
            "emailVerified": true,
            "credentials": [{
                "type": "password",
                "value": password,
                "temporary": false,
            }],
        });

        let response = self
            .http
            .post(url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::identity("create user", format!("{}: {}", url, e)))?;

        check_status("create user", response).await?;
        Ok(())
    }

    async fn reset_password(
        &self,
        base_url: &str,
        token: &str,
        realm: &str,
        user_id: &str,
        password: &str,
    ) -> Result<()> {
        let url = endpoint(
            base_url,
            &["admin", "realms", realm, "users", user_id, "reset-password"],
        )?;
        let body = json!({
            "type": "password",
            "value": password,
            "temporary": false,
        });

        let response = self
            .http
            .put(url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::identity("reset password", format!("{}: {}", url, e)))?;

        let response = check_status("reset password", response).await?;
        if response.status() != StatusCode::NO_CONTENT {
            debug!(status = %response.status(), "unexpected reset-password status");
        }
        Ok(())
    }
}
