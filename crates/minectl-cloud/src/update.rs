//! Remote update dispatch over SSH.
//!
//! Runs the update hook the bootstrap payload installed on the instance.
//! Connection-level failures (unreachable host, auth) are surfaced
//! separately from remote command failures: the former are safe to retry,
//! the latter may have already run part of a non-idempotent step.

use crate::types::ServerSpec;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Exit code the OpenSSH client reserves for connection and protocol errors.
const SSH_CONNECTION_EXIT: i32 = 255;

/// Command sequence the bootstrap payload installs on every instance.
const UPDATE_COMMAND: &str = "sudo /usr/local/bin/update-minecraft";

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("cannot reach {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("remote update on {host} exited with {code}: {stderr}")]
    Command {
        host: String,
        code: i32,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// One SSH-reachable instance.
pub struct RemoteServer {
    ssh_key_path: PathBuf,
    ip: String,
    user: String,
}

impl RemoteServer {
    pub fn new(ssh_key_path: impl Into<PathBuf>, ip: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            ssh_key_path: ssh_key_path.into(),
            ip: ip.into(),
            user: user.into(),
        }
    }

    fn ssh_args(&self, command: &str) -> Vec<String> {
        vec![
            "-i".into(),
            self.ssh_key_path.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "ConnectTimeout=10".into(),
            format!("{}@{}", self.user, self.ip),
            command.into(),
        ]
    }

    /// Run the idempotent update procedure on the instance.
    pub async fn update_server(&self, spec: &ServerSpec) -> Result<()> {
        debug!(host = %self.ip, user = %self.user, "dispatching remote update");
        self.run(UPDATE_COMMAND).await?;
        info!(host = %self.ip, name = %spec.name, "remote update finished");
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<()> {
        let args = self.ssh_args(command);
        let output = Command::new("ssh")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| UpdateError::Connection {
                host: self.ip.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(SSH_CONNECTION_EXIT) | None => Err(UpdateError::Connection {
                host: self.ip.clone(),
                reason: stderr,
            }),
            Some(code) => Err(UpdateError::Command {
                host: self.ip.clone(),
                code,
                stderr,
            }),
        }
    }
}
