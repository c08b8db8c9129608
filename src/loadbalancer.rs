//! Load-balancer backend reconciliation.
//!
//! Atomic by convention: back up the config, rewrite, syntax-check, and only
//! then restart; on check or restart failure the pre-change backup is
//! restored. After a successful reconciliation exactly one backend line
//! exists per live control-plane node and zero for removed nodes.

use crate::config::{LoadBalancerConfig, TimeoutConfig};
use crate::error::OrchestrationError;
use crate::executor::BatchExecutor;
use crate::lease::LeaseRegistry;
use crate::provision::commands;
use crate::types::Hop;

#[derive(Clone)]
pub struct BackendReconciler {
    executor: BatchExecutor,
    leases: LeaseRegistry,
    lb: LoadBalancerConfig,
    timeouts: TimeoutConfig,
}

impl BackendReconciler {
    pub fn new(
        executor: BatchExecutor,
        leases: LeaseRegistry,
        lb: LoadBalancerConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            executor,
            leases,
            lb,
            timeouts,
        }
    }

    fn lease_key(hops: &[Hop]) -> String {
        let host = hops.last().map(|h| h.host.as_str()).unwrap_or("unknown");
        format!("lb:{}", host)
    }

    fn credential(hops: &[Hop]) -> String {
        hops.last().map(|h| h.credential.clone()).unwrap_or_default()
    }

    /// Ensure exactly one backend line routes to `node_name` at `address`.
    /// Idempotent: existing lines for the node are purged before the single
    /// insert, so reconciling the same address twice yields one line.
    pub async fn ensure_backend(
        &self,
        lb_hops: &[Hop],
        node_name: &str,
        address: &str,
    ) -> Result<(), OrchestrationError> {
        let _lease = self.leases.acquire(Self::lease_key(lb_hops))?;
        let cred = Self::credential(lb_hops);

        tracing::info!(
            "[BackendReconciler] Ensuring backend line for {} -> {}:{}",
            node_name,
            address,
            self.lb.api_port
        );

        let commands = vec![
            commands::backup_lb_config(&self.lb.config_path, &cred),
            commands::purge_backend_lines(&self.lb.config_path, node_name, &cred),
            commands::insert_backend_line(
                &self.lb.config_path,
                &self.lb.backend_section,
                node_name,
                address,
                self.lb.api_port,
                &cred,
            ),
            commands::validate_lb_config(&self.lb.config_path, &cred),
        ];

        self.apply(lb_hops, commands, &cred, node_name).await
    }

    /// Remove the backend line for `node_name`, with the same
    /// backup/validate/restart/rollback shape as insertion.
    pub async fn remove_backend(
        &self,
        lb_hops: &[Hop],
        node_name: &str,
    ) -> Result<(), OrchestrationError> {
        let _lease = self.leases.acquire(Self::lease_key(lb_hops))?;
        let cred = Self::credential(lb_hops);

        tracing::info!("[BackendReconciler] Removing backend line for {}", node_name);

        let commands = vec![
            commands::backup_lb_config(&self.lb.config_path, &cred),
            commands::purge_backend_lines(&self.lb.config_path, node_name, &cred),
            commands::validate_lb_config(&self.lb.config_path, &cred),
        ];

        self.apply(lb_hops, commands, &cred, node_name).await
    }

    /// Run a rewrite batch ending in the syntax check, and restart the
    /// service only once every step including the check came back clean. The
    /// batch executor treats non-zero exits as data, so the restart must not
    /// ride in the same batch as the validation it depends on. On any
    /// failure, restore the backup, restart once with the restored config,
    /// and surface the failure with full attribution.
    async fn apply(
        &self,
        lb_hops: &[Hop],
        commands: Vec<String>,
        credential: &str,
        node_name: &str,
    ) -> Result<(), OrchestrationError> {
        let results = self
            .executor
            .run_batch(lb_hops, &commands, self.timeouts.exec())
            .await?;

        let failed = match results.iter().find(|r| !r.success()) {
            Some(failed) => failed.clone(),
            None => {
                let restart = self
                    .executor
                    .run_one(
                        lb_hops,
                        &commands::restart_service(&self.lb.service, credential),
                        self.timeouts.exec(),
                    )
                    .await?;
                if restart.success() {
                    tracing::info!(
                        "[BackendReconciler] Reconciliation for {} applied",
                        node_name
                    );
                    return Ok(());
                }
                restart
            }
        };

        tracing::warn!(
            "[BackendReconciler] Step failed (exit {}), rolling back: {}",
            failed.exit_code,
            failed.command
        );

        let rollback = vec![
            commands::restore_lb_backup(&self.lb.config_path, credential),
            commands::restart_service(&self.lb.service, credential),
        ];
        let rollback_results = self
            .executor
            .run_batch(lb_hops, &rollback, self.timeouts.exec())
            .await?;

        let restored = rollback_results.iter().all(|r| r.success());
        Err(OrchestrationError::Reconciliation(format!(
            "backend reconciliation for {} failed at `{}` (exit {}): {}; backup {}",
            node_name,
            failed.command,
            failed.exit_code,
            failed.stderr.trim(),
            if restored { "restored" } else { "restore FAILED" }
        )))
    }
}
