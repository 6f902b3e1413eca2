//! Common types for VIP runs: errors, naming, polling, site descriptors,
//! and control-plane access.

#![deny(missing_docs)]

pub mod control_plane;
pub mod error;
pub mod kube_utils;
pub mod naming;
pub mod poll;
pub mod site;
pub mod status;

pub use control_plane::{ControlPlane, KubeControlPlane};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable carrying the test identity's username into the test suite
pub const TEST_USERNAME_ENV: &str = "VIP_TEST_USERNAME";

/// Environment variable carrying the test identity's password into the test suite
pub const TEST_PASSWORD_ENV: &str = "VIP_TEST_PASSWORD";

/// Key of the username in the credential secret
pub const SECRET_USERNAME_KEY: &str = "username";

/// Key of the password in the credential secret
pub const SECRET_PASSWORD_KEY: &str = "password";
