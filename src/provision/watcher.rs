//! Background completion watcher.
//!
//! Provisioning scripts run detached and can take tens of minutes; the
//! watcher performs the blocking wait remotely (a single round trip bounded
//! by the ceiling) and reports back through persistence when the completion
//! marker appears. Every watcher is observable: callers hold a [`WatchHandle`]
//! with a queryable status record and a completion receiver, so timeouts and
//! post-hoc failures are not log-only.

use crate::error::OrchestrationError;
use crate::executor::BatchExecutor;
use crate::loadbalancer::BackendReconciler;
use crate::persistence::Persistence;
use crate::provision::commands;
use crate::types::{Hop, InstallationOutcome};
use crate::wire;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Phase of a background watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Waiting,
    Completed,
    /// Completion marker never appeared within the ceiling.
    TimedOut,
    Failed,
}

/// Queryable status record of a background watch.
#[derive(Debug, Clone)]
pub struct WatchStatus {
    pub phase: WatchPhase,
    pub message: Option<String>,
}

/// Handle to a detached watch task: a status record the caller (or a separate
/// poller) can query, plus a completion receiver.
pub struct WatchHandle {
    pub node_id: String,
    status: Arc<Mutex<WatchStatus>>,
    done: oneshot::Receiver<InstallationOutcome>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("node_id", &self.node_id)
            .field("status", &self.status())
            .finish()
    }
}

impl WatchHandle {
    pub fn status(&self) -> WatchStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Await the outcome. `None` means the watcher gave up (timeout or
    /// transport failure); the status record carries the detail.
    pub async fn wait(self) -> Option<InstallationOutcome> {
        self.done.await.ok()
    }
}

/// Backend entry to undo when a join never completes. Reconciliation of the
/// load balancer belongs to the same completion path that persists the join
/// outcome, so a failed join cannot leave an orphaned backend line.
pub struct BackendRollback {
    pub reconciler: BackendReconciler,
    pub lb_hops: Vec<Hop>,
    pub node_name: String,
}

/// Parameters of one watch task.
pub struct WatchSpec {
    pub node_id: String,
    pub hops: Vec<Hop>,
    pub log_path: String,
    pub aux_path: String,
    pub ceiling: Duration,
    /// Expect join secrets in the log once the marker appears.
    pub extract_secrets: bool,
    pub rollback: Option<BackendRollback>,
}

/// Spawn the detached watch task.
pub fn spawn_watch(
    executor: BatchExecutor,
    persistence: Arc<dyn Persistence>,
    spec: WatchSpec,
) -> WatchHandle {
    let status = Arc::new(Mutex::new(WatchStatus {
        phase: WatchPhase::Waiting,
        message: None,
    }));
    let (tx, rx) = oneshot::channel();

    let task_status = Arc::clone(&status);
    let node_id = spec.node_id.clone();

    tokio::spawn(async move {
        let outcome = run_watch(&executor, persistence, &spec, &task_status).await;
        if let Some(rollback) = rollback_needed(&spec, &outcome) {
            undo_backend(rollback).await;
        }
        if let Some(outcome) = outcome {
            let _ = tx.send(outcome);
        }
        // Dropping tx without sending closes the receiver; the handle's
        // status record is the durable explanation.
    });

    WatchHandle {
        node_id,
        status,
        done: rx,
    }
}

fn set_status(status: &Arc<Mutex<WatchStatus>>, phase: WatchPhase, message: Option<String>) {
    let mut guard = status
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.phase = phase;
    guard.message = message;
}

fn rollback_needed<'a>(
    spec: &'a WatchSpec,
    outcome: &Option<InstallationOutcome>,
) -> Option<&'a BackendRollback> {
    let failed = match outcome {
        Some(o) => !o.succeeded || (spec.extract_secrets && o.secrets.is_none()),
        None => true,
    };
    if failed {
        spec.rollback.as_ref()
    } else {
        None
    }
}

async fn undo_backend(rollback: &BackendRollback) {
    tracing::warn!(
        "[CompletionWatcher] Join for {} did not complete, removing its backend line",
        rollback.node_name
    );
    if let Err(e) = rollback
        .reconciler
        .remove_backend(&rollback.lb_hops, &rollback.node_name)
        .await
    {
        tracing::error!(
            "[CompletionWatcher] Backend rollback for {} failed: {}",
            rollback.node_name,
            e
        );
    }
}

async fn run_watch(
    executor: &BatchExecutor,
    persistence: Arc<dyn Persistence>,
    spec: &WatchSpec,
    status: &Arc<Mutex<WatchStatus>>,
) -> Option<InstallationOutcome> {
    tracing::info!(
        "[CompletionWatcher] Watching {} for marker (ceiling {:?})",
        spec.node_id,
        spec.ceiling
    );

    // The remote timeout(1) does the waiting; the transport deadline only
    // needs a little slack on top of the ceiling.
    let wait_cmd = commands::completion_wait(
        &spec.log_path,
        wire::COMPLETION_MARKER,
        spec.ceiling.as_secs(),
    );
    let transport_deadline = spec.ceiling + Duration::from_secs(60);

    let wait = match executor
        .run_one(&spec.hops, &wait_cmd, transport_deadline)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(
                "[CompletionWatcher] Transport failure while watching {}: {}",
                spec.node_id,
                e
            );
            set_status(status, WatchPhase::Failed, Some(e.to_string()));
            return None;
        }
    };

    if !wait.success() {
        tracing::warn!(
            "[CompletionWatcher] Completion marker for {} never appeared within {:?}",
            spec.node_id,
            spec.ceiling
        );
        set_status(
            status,
            WatchPhase::TimedOut,
            Some(format!("no completion marker within {:?}", spec.ceiling)),
        );
        return None;
    }

    // Marker observed; fetch the evidence and the auxiliary join file.
    let fetch = vec![
        commands::read_file(&spec.log_path),
        commands::read_file(&spec.aux_path),
    ];
    let fetched = match executor
        .run_batch(&spec.hops, &fetch, Duration::from_secs(60))
        .await
    {
        Ok(results) => results,
        Err(e) => {
            set_status(status, WatchPhase::Failed, Some(e.to_string()));
            return None;
        }
    };

    let log = fetched[0].stdout.clone();
    let aux = fetched[1].stdout.clone();

    let secrets = if spec.extract_secrets {
        wire::extract_join_secrets(&log, if aux.trim().is_empty() { None } else { Some(&aux) })
    } else {
        None
    };

    let evidence: String = log
        .lines()
        .rev()
        .take(20)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n");

    let outcome = InstallationOutcome {
        succeeded: true,
        evidence,
        secrets: secrets.clone(),
    };

    if let Some(secrets) = &secrets {
        // Re-read before writing: the record may have moved while the
        // provisioning ran. A conflict here means another writer got in
        // between our read and write - surface it, never overwrite.
        match persistence.get(&spec.node_id).await {
            Ok(Some(mut record)) => {
                // Guard the one-primary-per-infra invariant again at write
                // time; an install racing another control plane may have
                // lost.
                match persistence.find_primary(&record.infra_id).await {
                    Ok(Some(primary)) if primary.id != record.id => {
                        let message = format!(
                            "infra {} gained primary {} while {} was provisioning",
                            record.infra_id, primary.id, record.id
                        );
                        tracing::error!("[CompletionWatcher] {}", message);
                        set_status(status, WatchPhase::Failed, Some(message));
                        return Some(InstallationOutcome {
                            succeeded: false,
                            ..outcome
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        set_status(status, WatchPhase::Failed, Some(e.to_string()));
                        return Some(InstallationOutcome {
                            succeeded: false,
                            ..outcome
                        });
                    }
                }
                record.join_command = secrets.join_command.clone();
                record.join_token = secrets.join_token.clone();
                record.certificate_key = secrets.certificate_key.clone();
                match persistence.save(record).await {
                    Ok(_) => {
                        tracing::info!(
                            "[CompletionWatcher] Join secrets persisted for {}",
                            spec.node_id
                        );
                    }
                    Err(e @ OrchestrationError::VersionConflict(_)) => {
                        tracing::error!(
                            "[CompletionWatcher] Conflict persisting secrets for {}: {}",
                            spec.node_id,
                            e
                        );
                        set_status(status, WatchPhase::Failed, Some(e.to_string()));
                        return Some(InstallationOutcome {
                            succeeded: false,
                            ..outcome
                        });
                    }
                    Err(e) => {
                        set_status(status, WatchPhase::Failed, Some(e.to_string()));
                        return Some(InstallationOutcome {
                            succeeded: false,
                            ..outcome
                        });
                    }
                }
            }
            Ok(None) => {
                tracing::warn!(
                    "[CompletionWatcher] Node {} vanished before secrets could be persisted",
                    spec.node_id
                );
            }
            Err(e) => {
                set_status(status, WatchPhase::Failed, Some(e.to_string()));
                return Some(InstallationOutcome {
                    succeeded: false,
                    ..outcome
                });
            }
        }
    } else if spec.extract_secrets {
        // The node stays without a join secret; peer joins will fail fast on
        // their precondition check instead of joining with an empty
        // credential.
        tracing::warn!(
            "[CompletionWatcher] No join secrets recovered for {}",
            spec.node_id
        );
    }

    set_status(status, WatchPhase::Completed, None);
    Some(outcome)
}
