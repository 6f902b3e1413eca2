//! The credential secret handed to the test suite

use std::collections::BTreeMap;
use std::fmt;

use vip_common::{ControlPlane, Error, Result, SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY};

/// Username/password pair stored in a Secret under `username`/`password`
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSecret {
    /// Login name
    pub username: String,
    /// Plaintext password
    pub password: String,
}

impl fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSecret")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CredentialSecret {
    /// Read the pair out of decoded Secret data. `secret` names the Secret in errors.
    pub fn from_data(secret: &str, data: &BTreeMap<String, String>) -> Result<Self> {
        let field = |key: &str| {
            data.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| Error::config(format!("secret {} has no {} key", secret, key)))
        };
        Ok(Self {
            username: field(SECRET_USERNAME_KEY)?,
            password: field(SECRET_PASSWORD_KEY)?,
        })
    }

    /// Secret data for this pair
    pub fn into_data(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SECRET_USERNAME_KEY.to_string(), self.username),
            (SECRET_PASSWORD_KEY.to_string(), self.password),
        ])
    }
}

/// Load a credential pair from a Secret, failing with a configuration error if it is absent
pub async fn read_credentials(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    name: &str,
) -> Result<CredentialSecret> {
    let data = control_plane
        .get_secret(namespace, name)
        .await?
        .ok_or_else(|| Error::config(format!("secret {}/{} not found", namespace, name)))?;
    CredentialSecret::from_data(name, &data)
}
