//! Remote execution seam: secure copy and remote commands.
//!
//! The pipeline only ever talks to a target host through [`RemoteExecutor`],
//! so transfer logic is testable without hosts or a network. The production
//! implementation shells out to the `scp`/`ssh` binaries with key-based
//! authentication.
//!
//! Host key verification is disabled on this channel on purpose: targets are
//! freshly created instances with no stable host key, and the channel only
//! ever pushes the bundle. Do not "fix" this by re-enabling verification;
//! first boots would fail on every host.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeployError;

/// Seconds allowed for the SSH connection to establish.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Addressing and credentials for one target host.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub identity_file: PathBuf,
}

impl SshTarget {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        identity_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            identity_file: identity_file.into(),
        }
    }

    /// `user@host` form used by scp/ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Executes operations against a remote host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Copy `local` to `remote_path` on the target. Bounded by `timeout`.
    async fn copy_to_remote(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), DeployError>;

    /// Run `command` on the target, returning its stdout. Bounded by `timeout`.
    async fn run_remote(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<String, DeployError>;
}

/// Production executor backed by the `scp` and `ssh` binaries.
#[derive(Debug, Default)]
pub struct SubprocessExecutor;

impl SubprocessExecutor {
    fn base_options(target: &SshTarget) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
            "-i".into(),
            target.identity_file.to_string_lossy().into_owned(),
        ]
    }

    /// Run a command on a blocking thread, bounded by `timeout`.
    ///
    /// The timeout turns into a failure, never a retry; retrying is the
    /// caller's responsibility at a higher level.
    async fn output_with_timeout(
        mut cmd: Command,
        program: &'static str,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<Output, DeployError> {
        let handle = tokio::task::spawn_blocking(move || cmd.output());
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(DeployError::CommandSpawn { program, source: e }),
            Ok(Err(e)) => Err(DeployError::CommandSpawn {
                program,
                source: std::io::Error::other(format!("task join error: {e}")),
            }),
            Err(_) => Err(DeployError::Timeout {
                operation,
                seconds: timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SubprocessExecutor {
    async fn copy_to_remote(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), DeployError> {
        let mut cmd = Command::new("scp");
        cmd.args(Self::base_options(target))
            .arg(local)
            .arg(format!("{}:{}", target.destination(), remote_path));

        let output = Self::output_with_timeout(cmd, "scp", "bundle copy", timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DeployError::CopyFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn run_remote(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<String, DeployError> {
        let mut cmd = Command::new("ssh");
        cmd.args(Self::base_options(target))
            .arg(target.destination())
            .arg(command);

        let output = Self::output_with_timeout(cmd, "ssh", "remote command", timeout).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(DeployError::RemoteCommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}
