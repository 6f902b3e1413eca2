//! Ephemeral test identity for VIP runs
//!
//! Creates (or re-keys) a single test user in the site's identity provider
//! and stores its credentials in a Secret the test suite reads from.

#![deny(missing_docs)]

pub mod credentials;
pub mod keycloak;
pub mod password;
pub mod provision;

pub use credentials::{read_credentials, CredentialSecret};
pub use keycloak::{IdentityProvider, KeycloakClient};
pub use provision::{ensure_test_identity, IdentityRequest};
