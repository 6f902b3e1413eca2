//! Running the test suite on the operator's machine

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use vip_common::{Error, Result, TEST_PASSWORD_ENV, TEST_USERNAME_ENV};
use vip_identity::CredentialSecret;
use vip_job::compiler::test_args;

/// Test runner invoked when none is configured
pub const DEFAULT_LOCAL_RUNNER: &str = "pytest";

/// One local invocation of the test suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInvocation {
    /// Rendered configuration file
    pub config_path: PathBuf,
    /// Category filter; empty runs everything
    pub category: String,
    /// Test-user credentials, exported to the suite's environment
    pub credentials: Option<CredentialSecret>,
}

/// Executes the test suite locally
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the suite to completion. A failing suite is `Error::TestsFailed`.
    async fn run(&self, invocation: &LocalInvocation, cancel: &CancellationToken) -> Result<()>;
}

/// Runs the suite as a child process with inherited stdio
pub struct ProcessRunner {
    program: String,
}

impl ProcessRunner {
    /// Runner invoking `program` (e.g. `pytest`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, invocation: &LocalInvocation) -> Command {
        let config_path = invocation.config_path.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        cmd.args(test_args(&config_path, &invocation.category))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(creds) = &invocation.credentials {
            cmd.env(TEST_USERNAME_ENV, &creds.username)
                .env(TEST_PASSWORD_ENV, &creds.password);
        }
        cmd
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_RUNNER)
    }
}

#[async_trait]
impl TestRunner for ProcessRunner {
    async fn run(&self, invocation: &LocalInvocation, cancel: &CancellationToken) -> Result<()> {
        info!(
            program = %self.program,
            config = %invocation.config_path.display(),
            category = %invocation.category,
            "running tests locally"
        );
        let mut child = self.command(invocation).spawn().map_err(|e| {
            Error::config(format!("failed to start test runner {}: {}", self.program, e))
        })?;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(program = %self.program, "run cancelled, stopping test runner");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to stop test runner");
                }
                return Err(Error::cancelled("local test run"));
            }
            status = child.wait() => status?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(Error::TestsFailed {
                status: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(category: &str) -> LocalInvocation {
        LocalInvocation {
            config_path: PathBuf::from("/tmp/vip-config.toml"),
            category: category.to_string(),
            credentials: Some(CredentialSecret {
                username: "vip-tester".to_string(),
                password: "s3cret".to_string(),
            }),
        }
    }

    #[test]
    fn command_carries_config_category_and_credentials() {
        let runner = ProcessRunner::default();
        let cmd = runner.command(&invocation("smoke"));
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "pytest");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["--vip-config", "/tmp/vip-config.toml", "-m", "smoke"]);

        let envs: Vec<_> = std_cmd
            .get_envs()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.map(|v| v.to_string_lossy().into_owned())))
            .collect();
        assert!(envs.contains(&(TEST_USERNAME_ENV.to_string(), Some("vip-tester".to_string()))));
        assert!(envs.contains(&(TEST_PASSWORD_ENV.to_string(), Some("s3cret".to_string()))));
    }

    #[test]
    fn command_without_credentials_sets_no_env() {
        let runner = ProcessRunner::new("vip-tests");
        let mut inv = invocation("");
        inv.credentials = None;
        let cmd = runner.command(&inv);
        assert_eq!(cmd.as_std().get_envs().count(), 0);
        assert_eq!(cmd.as_std().get_args().count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_runner_passes() {
        let runner = ProcessRunner::new("true");
        runner
            .run(&invocation(""), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_runner_is_tests_failed() {
        let runner = ProcessRunner::new("false");
        let err = runner
            .run(&invocation(""), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TestsFailed { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn missing_runner_is_config_error() {
        let runner = ProcessRunner::new("vip-runner-that-does-not-exist");
        let err = runner
            .run(&invocation(""), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_runner() {
        let runner = ProcessRunner::new("sleep");
        let mut inv = invocation("");
        inv.config_path = PathBuf::from("30");
        let cancel = CancellationToken::new();
        cancel.cancel();

        // `sleep --vip-config 30` may exit on its own, but cancellation is observed first
        let err = runner.run(&inv, &cancel).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
