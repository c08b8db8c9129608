//! Batch executor: ordered shell commands across a hop chain.

use crate::error::OrchestrationError;
use crate::transport::RemoteShell;
use crate::types::{CommandResult, Hop};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runs an ordered list of commands against the final hop of a chain,
/// returning one result per input command, in input order.
///
/// The hop chain is established once per batch. A transport-level failure
/// aborts the remaining commands; a non-zero exit code in an individual
/// command does not - the caller inspects exit codes per result. Stateless
/// between calls.
#[derive(Clone)]
pub struct BatchExecutor {
    shell: Arc<dyn RemoteShell>,
}

impl BatchExecutor {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shell }
    }

    /// Execute `commands` sequentially under one shared batch deadline.
    pub async fn run_batch(
        &self,
        hops: &[Hop],
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<CommandResult>, OrchestrationError> {
        let deadline = Instant::now() + timeout;
        let session = self.shell.open(hops).await?;

        tracing::debug!(
            "[BatchExecutor] Running {} command(s) against {} (timeout {:?})",
            commands.len(),
            session.target.host,
            timeout
        );

        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let _ = self.shell.close(session).await;
                return Err(OrchestrationError::transport(
                    crate::error::TransportErrorKind::Timeout,
                    format!("batch deadline exceeded after {} command(s)", results.len()),
                ));
            }

            let started = Instant::now();
            match self.shell.run(&session, command, remaining).await {
                Ok(result) => {
                    if !result.success() {
                        tracing::debug!(
                            "[BatchExecutor] Command exited {} after {}ms: {}",
                            result.exit_code,
                            started.elapsed().as_millis(),
                            command
                        );
                    }
                    results.push(result);
                }
                Err(e) => {
                    tracing::warn!(
                        "[BatchExecutor] Transport failure, aborting batch at command {}/{}: {}",
                        results.len() + 1,
                        commands.len(),
                        e
                    );
                    let _ = self.shell.close(session).await;
                    return Err(e);
                }
            }
        }

        self.shell.close(session).await?;
        Ok(results)
    }

    /// Convenience wrapper for single-command batches.
    pub async fn run_one(
        &self,
        hops: &[Hop],
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, OrchestrationError> {
        let commands = [command.to_string()];
        let mut results = self.run_batch(hops, &commands, timeout).await?;
        Ok(results.remove(0))
    }
}
