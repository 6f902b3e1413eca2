//! Error types for VIP runs
//!
//! Errors are grouped by class so the operator can tell a broken site
//! configuration apart from a hung cluster, an unpullable image, or a test
//! suite that simply failed. Each class maps to its own process exit code.

use std::time::Duration;

use thiserror::Error;

/// Main error type for VIP operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid input, detected before any cluster mutation
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// A control-plane operation failed
    #[error("control plane error during {operation}: {message}")]
    ControlPlane {
        /// Operation that failed (e.g., "apply config map")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// An identity-provider call failed
    #[error("identity provider error during {operation}: {message}")]
    IdentityProvider {
        /// Operation that failed (e.g., "create user")
        operation: String,
        /// Description of what failed
        message: String,
        /// HTTP status returned by the provider, if a response was received
        status: Option<u16>,
    },

    /// A bounded wait elapsed before its condition was met
    #[error("timed out after {after:?} waiting for {stage}")]
    Timeout {
        /// The stage that was waiting (e.g., "job completion")
        stage: String,
        /// How long the stage was allowed to run
        after: Duration,
    },

    /// The run was cancelled (e.g. Ctrl-C) while a stage was in progress
    #[error("cancelled while waiting for {stage}")]
    Cancelled {
        /// The stage that was interrupted
        stage: String,
    },

    /// The execution unit cannot start because its image cannot be pulled
    #[error("image pull failed for pod {pod}: {reason}")]
    ImagePull {
        /// Pod whose container is stuck
        pod: String,
        /// Waiting reason and message reported by the kubelet
        reason: String,
    },

    /// The job ran to completion and reported failure
    #[error("job {job} failed")]
    JobFailed {
        /// Name of the failed job
        job: String,
    },

    /// The local test process exited unsuccessfully
    #[error("local test run failed with {status}")]
    TestsFailed {
        /// Exit status description (code or signal)
        status: String,
    },

    /// The cryptographic random source is unavailable
    #[error("cryptographic random source unavailable while generating {purpose}")]
    Random {
        /// What the random bytes were for
        purpose: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a control-plane error with the failing operation
    pub fn control_plane(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an identity-provider error without an HTTP status
    pub fn identity(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IdentityProvider {
            operation: operation.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create an identity-provider error carrying the HTTP status
    pub fn identity_status(
        operation: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::IdentityProvider {
            operation: operation.into(),
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a timeout error for a polling stage
    pub fn timeout(stage: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            after,
        }
    }

    /// Create a cancellation error for an interrupted stage
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether the identity provider rejected a request because the object already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::IdentityProvider { status: Some(409), .. })
    }

    /// Whether this error is an image-pull infrastructure fault
    pub fn is_image_pull(&self) -> bool {
        matches!(self, Self::ImagePull { .. })
    }

    /// Whether this error is a timeout or cancellation of a bounded wait.
    ///
    /// Both mean the run stopped before reaching a verdict, so they share a class.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    /// Stable error class name used in the final log line
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "configuration",
            Self::ControlPlane { .. } => "control-plane",
            Self::IdentityProvider { .. } => "identity-provider",
            Self::Timeout { .. } | Self::Cancelled { .. } => "timeout",
            Self::ImagePull { .. } => "image-pull",
            Self::JobFailed { .. } | Self::TestsFailed { .. } => "test-failure",
            Self::Random { .. } => "random-source",
            Self::Serialization { .. } | Self::Io(_) => "internal",
        }
    }

    /// Process exit code for this error class
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::JobFailed { .. } | Self::TestsFailed { .. } => 1,
            Self::Config { .. } => 2,
            Self::Timeout { .. } | Self::Cancelled { .. } => 3,
            Self::ImagePull { .. } => 4,
            _ => 5,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
