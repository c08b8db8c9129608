//! Status poller: bounded retry around a single remote probe command.

use crate::config::PollConfig;
use crate::executor::BatchExecutor;
use crate::types::{Hop, NodeStatus};
use crate::wire;
use std::time::Duration;
use tokio::time::sleep;

/// Wraps a probe command in retry-with-delay and parses the
/// marker-delimited boolean flags it emits.
///
/// If every attempt fails, the conservative "not installed / not running"
/// status is returned rather than an error: an unreachable node must read as
/// down, not as unknown, so downstream automation (HA flips, reinstall
/// gating) stays conservative.
#[derive(Clone)]
pub struct StatusPoller {
    executor: BatchExecutor,
    poll: PollConfig,
    probe_timeout: Duration,
}

impl StatusPoller {
    pub fn new(executor: BatchExecutor, poll: PollConfig, probe_timeout: Duration) -> Self {
        Self {
            executor,
            poll,
            probe_timeout,
        }
    }

    /// Probe until both sentinels show up in one response, up to the
    /// configured attempt cap. Only the first few attempts sleep between
    /// retries.
    pub async fn poll_status(&self, hops: &[Hop], probe_command: &str) -> NodeStatus {
        for attempt in 0..self.poll.attempts {
            match self
                .executor
                .run_one(hops, probe_command, self.probe_timeout)
                .await
            {
                Ok(result) => {
                    if let Some(status) = wire::parse_status(&result.stdout) {
                        tracing::debug!(
                            "[StatusPoller] Probe succeeded on attempt {}: installed={} running={}",
                            attempt + 1,
                            status.installed,
                            status.running
                        );
                        return status;
                    }
                    tracing::debug!(
                        "[StatusPoller] Attempt {}: sentinels missing from probe output",
                        attempt + 1
                    );
                }
                Err(e) => {
                    tracing::debug!("[StatusPoller] Attempt {} failed: {}", attempt + 1, e);
                }
            }

            if attempt < self.poll.eager_attempts {
                sleep(self.poll.interval()).await;
            }
        }

        tracing::warn!(
            "[StatusPoller] All {} attempts exhausted, reporting node as down",
            self.poll.attempts
        );
        NodeStatus::offline()
    }

    /// Run a one-shot check whose verdict is a plain exit-code success. Used
    /// for membership cross-checks where no sentinel framing exists.
    pub async fn check_contains(
        &self,
        hops: &[Hop],
        command: &str,
        needle: &str,
    ) -> bool {
        match self.executor.run_one(hops, command, self.probe_timeout).await {
            Ok(result) => {
                result.success()
                    && result
                        .stdout
                        .lines()
                        .any(|line| line.split_whitespace().next() == Some(needle))
            }
            Err(e) => {
                tracing::debug!("[StatusPoller] Containment check failed: {}", e);
                false
            }
        }
    }
}
