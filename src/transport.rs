//! Remote shell transport over a chain of SSH hops.
//!
//! The core talks to hosts through the narrow [`RemoteShell`] trait; the
//! production implementation drives the system `ssh` client with a ProxyJump
//! chain and a shared ControlMaster socket so the tunnel is established once
//! per batch. Hop principals authenticate with pre-installed keys; the hop
//! credential is the sudo password commands pipe into `sudo -S`, not an SSH
//! password.

use crate::error::OrchestrationError;
use crate::types::{CommandResult, Hop};
use crate::wire;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// An established tunnel to the last hop of a chain.
#[derive(Debug, Clone)]
pub struct ShellSession {
    /// Execution target (last hop).
    pub target: Hop,
    /// ssh arguments shared by every command in the session.
    base_args: Vec<String>,
    control_path: String,
}

impl ShellSession {
    /// Session carrying no ssh arguments, for transports that do not shell
    /// out to the ssh client.
    pub fn direct(target: Hop) -> Self {
        Self {
            target,
            base_args: Vec::new(),
            control_path: String::new(),
        }
    }
}

/// Remote shell transport: open a hop chain, run commands against the final
/// hop, close. Implementations must be safe to share across tasks.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn open(&self, hops: &[Hop]) -> Result<ShellSession, OrchestrationError>;

    async fn run(
        &self,
        session: &ShellSession,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, OrchestrationError>;

    async fn close(&self, session: ShellSession) -> Result<(), OrchestrationError>;
}

/// Production transport over the system ssh client.
#[derive(Debug, Clone, Default)]
pub struct SshShell {
    /// Directory ControlMaster sockets are placed in.
    control_dir: String,
}

impl SshShell {
    pub fn new() -> Self {
        Self {
            control_dir: "/tmp".to_string(),
        }
    }

    pub fn with_control_dir(control_dir: impl Into<String>) -> Self {
        Self {
            control_dir: control_dir.into(),
        }
    }

    fn build_session(&self, hops: &[Hop]) -> Result<ShellSession, OrchestrationError> {
        let target = hops
            .last()
            .ok_or_else(|| OrchestrationError::Config("empty hop chain".to_string()))?
            .clone();

        let control_path = format!(
            "{}/cluster-core-{}-{}-{}.sock",
            self.control_dir,
            target.host,
            target.port,
            std::process::id()
        );

        let mut base_args: Vec<String> = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "ControlMaster=auto".into(),
            "-o".into(),
            format!("ControlPath={}", control_path),
            "-o".into(),
            "ControlPersist=60".into(),
            "-p".into(),
            target.port.to_string(),
        ];

        // Everything before the last hop becomes the ProxyJump chain.
        if hops.len() > 1 {
            let jumps: Vec<String> = hops[..hops.len() - 1]
                .iter()
                .map(|h| format!("{}:{}", h.destination(), h.port))
                .collect();
            base_args.push("-o".into());
            base_args.push(format!("ProxyJump={}", jumps.join(",")));
        }

        base_args.push(target.destination());

        Ok(ShellSession {
            target,
            base_args,
            control_path,
        })
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn open(&self, hops: &[Hop]) -> Result<ShellSession, OrchestrationError> {
        let session = self.build_session(hops)?;

        tracing::debug!(
            "[SshShell] Opening session to {} ({} hop(s))",
            session.target.host,
            hops.len()
        );

        // Establishing the master connection is itself the reachability
        // check; `true` exercises the whole chain without side effects.
        let result = self.run(&session, "true", Duration::from_secs(30)).await?;
        if !result.success() {
            let kind = wire::classify_transport_failure(&result.stderr);
            return Err(OrchestrationError::transport(
                kind,
                format!(
                    "failed to open hop chain to {}: {}",
                    session.target.host,
                    result.stderr.trim()
                ),
            ));
        }

        Ok(session)
    }

    async fn run(
        &self,
        session: &ShellSession,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, OrchestrationError> {
        let mut cmd = Command::new("ssh");
        cmd.args(&session.base_args).arg(command);
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(OrchestrationError::transport(
                    crate::error::TransportErrorKind::Timeout,
                    format!(
                        "command timed out after {:?} against {}",
                        timeout, session.target.host
                    ),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        // ssh reports 255 for its own (transport) failures; everything else
        // is the remote command's exit status and belongs to the caller.
        if exit_code == 255 {
            let kind = wire::classify_transport_failure(&stderr);
            return Err(OrchestrationError::transport(
                kind,
                format!("ssh to {} failed: {}", session.target.host, stderr.trim()),
            ));
        }

        Ok(CommandResult {
            command: command.to_string(),
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn close(&self, session: ShellSession) -> Result<(), OrchestrationError> {
        let status = Command::new("ssh")
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", session.control_path))
            .arg(session.target.destination())
            .output()
            .await;

        if let Err(e) = status {
            // A dead master is already what we wanted.
            tracing::debug!(
                "[SshShell] Control master for {} already gone: {}",
                session.target.host,
                e
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<Hop> {
        vec![
            Hop::new("bastion.example.com", 22, "jump"),
            Hop::new("10.0.0.10", 2222, "admin").with_credential("s3cret"),
        ]
    }

    #[test]
    fn session_targets_last_hop_with_proxyjump() {
        let shell = SshShell::new();
        let session = shell.build_session(&chain()).unwrap();
        assert_eq!(session.target.host, "10.0.0.10");
        let joined = session.base_args.join(" ");
        assert!(joined.contains("ProxyJump=jump@bastion.example.com:22"));
        assert!(joined.contains("-p 2222"));
        assert!(joined.ends_with("admin@10.0.0.10"));
    }

    #[test]
    fn single_hop_has_no_proxyjump() {
        let shell = SshShell::new();
        let session = shell
            .build_session(&[Hop::new("10.0.0.10", 22, "admin")])
            .unwrap();
        assert!(!session.base_args.join(" ").contains("ProxyJump"));
    }

    #[test]
    fn empty_chain_is_a_config_error() {
        let shell = SshShell::new();
        assert!(matches!(
            shell.build_session(&[]),
            Err(OrchestrationError::Config(_))
        ));
    }
}
