//! Provisioning state machine.
//!
//! Sequences install/join operations per node type, performs idempotency
//! pre-checks, and supervises background completion through observable watch
//! handles.

pub mod commands;
pub mod watcher;

use crate::config::OrchestratorConfig;
use crate::error::OrchestrationError;
use crate::executor::BatchExecutor;
use crate::lease::LeaseRegistry;
use crate::loadbalancer::BackendReconciler;
use crate::persistence::Persistence;
use crate::poller::StatusPoller;
use crate::teardown::StackTeardown;
use crate::types::{
    NodeKind, NodeRecord, NodeRole, NodeState, NodeStatus, RemovalStrategyReport,
};
use crate::wire;
use std::sync::Arc;
use std::time::SystemTime;
use watcher::{BackendRollback, WatchHandle, WatchSpec};

/// Outcome of an install request.
#[derive(Debug)]
pub enum InstallOutcome {
    /// Pre-check found the software present with live workloads; nothing was
    /// re-run and the current state is returned unchanged.
    NotRerun(NodeState),
    /// The install script was launched in the background.
    Launched(WatchHandle),
}

/// Verification result: probe status plus membership cross-check.
#[derive(Debug, Clone, Copy)]
pub struct VerifyReport {
    pub status: NodeStatus,
    pub state: NodeState,
    /// Is this hostname listed as a cluster member?
    pub member: bool,
    pub role: Option<NodeRole>,
}

/// Orchestrates node lifecycle operations against remote hosts.
pub struct NodeProvisioner {
    executor: BatchExecutor,
    poller: StatusPoller,
    persistence: Arc<dyn Persistence>,
    leases: LeaseRegistry,
    backend: BackendReconciler,
    teardown: StackTeardown,
    config: OrchestratorConfig,
}

impl NodeProvisioner {
    pub fn new(
        executor: BatchExecutor,
        persistence: Arc<dyn Persistence>,
        config: OrchestratorConfig,
    ) -> Self {
        let leases = LeaseRegistry::new(config.lease_ttl());
        let poller = StatusPoller::new(
            executor.clone(),
            config.poll.clone(),
            config.timeouts.probe(),
        );
        let backend = BackendReconciler::new(
            executor.clone(),
            leases.clone(),
            config.loadbalancer.clone(),
            config.timeouts.clone(),
        );
        let teardown = StackTeardown::new(
            executor.clone(),
            config.stack.clone(),
            config.timeouts.clone(),
        );
        Self {
            executor,
            poller,
            persistence,
            leases,
            backend,
            teardown,
            config,
        }
    }

    async fn load(&self, node_id: &str) -> Result<NodeRecord, OrchestrationError> {
        self.persistence
            .get(node_id)
            .await?
            .ok_or_else(|| OrchestrationError::Precondition(format!("unknown node {}", node_id)))
    }

    /// Install the node's software, launching the provisioning script in the
    /// background. Refused when the target binary already reports a version
    /// AND live workloads exist - reinstalling over a live workload is
    /// destructive.
    pub async fn install(&self, node_id: &str) -> Result<InstallOutcome, OrchestrationError> {
        let node = self.load(node_id).await?;
        let _lease = self.leases.acquire(format!("node:{}", node.id))?;

        tracing::info!("[NodeProvisioner] Install requested for {} ({})", node.id, node.kind);

        // A control-plane install runs cluster init and would mint a second
        // join token; once the infra has a primary, new control planes join
        // instead.
        if node.kind == NodeKind::ControlPlane {
            if let Some(primary) = self.persistence.find_primary(&node.infra_id).await? {
                if primary.id != node.id {
                    return Err(OrchestrationError::Precondition(format!(
                        "infra {} already has primary control plane {}; join {} instead",
                        node.infra_id, primary.id, node.id
                    )));
                }
            }
        }

        let precheck = self
            .executor
            .run_one(
                &node.hops,
                &commands::install_precheck(node.kind),
                self.config.timeouts.probe(),
            )
            .await?;

        if wire::sentinels_present(&precheck.stdout)
            && wire::flag(&precheck.stdout, "INSTALLED")
            && wire::flag(&precheck.stdout, "WORKLOADS")
        {
            let status = self
                .poller
                .poll_status(&node.hops, &commands::status_probe(node.kind))
                .await;
            tracing::info!(
                "[NodeProvisioner] {} already installed with live workloads, refusing re-install",
                node.id
            );
            return Ok(InstallOutcome::NotRerun(status.state()));
        }

        let handle = self.launch(&node, None, true).await?;
        Ok(InstallOutcome::Launched(handle))
    }

    /// Join `node_id` to the cluster anchored by `primary_id`.
    ///
    /// Fails fast when the primary holds no join token. For a control-plane
    /// peer the load-balancer backend entry is written first (the peer needs
    /// it to register); the join watcher owns the entry afterwards and
    /// removes it again if the join never completes.
    pub async fn join(
        &self,
        node_id: &str,
        primary_id: &str,
    ) -> Result<WatchHandle, OrchestrationError> {
        let node = self.load(node_id).await?;
        let primary = self.load(primary_id).await?;
        let _lease = self.leases.acquire(format!("node:{}", node.id))?;

        if primary.join_token.is_empty() {
            return Err(OrchestrationError::Precondition(format!(
                "primary {} holds no join token; provision it first",
                primary.id
            )));
        }
        if node.kind == NodeKind::LoadBalancer {
            return Err(OrchestrationError::Precondition(format!(
                "node {} is a load balancer and cannot join the cluster",
                node.id
            )));
        }

        if !wire::plausible_join_command(&primary.join_command) {
            return Err(OrchestrationError::Precondition(format!(
                "primary {} holds no usable join command",
                primary.id
            )));
        }

        let mut rollback = None;
        if node.kind == NodeKind::ControlPlane {
            let lb_hops = self.load_balancer_hops(&node.infra_id, &node.id).await?;
            self.backend
                .ensure_backend(&lb_hops, &node.name, node.address())
                .await?;
            rollback = Some(BackendRollback {
                reconciler: self.backend.clone(),
                lb_hops,
                node_name: node.name.clone(),
            });
        }

        let credential = node
            .hops
            .last()
            .map(|h| h.credential.clone())
            .unwrap_or_default();
        let script = commands::join_script(
            &primary.join_command,
            &credential,
            node.kind == NodeKind::ControlPlane,
            &primary.certificate_key,
        );

        self.launch_script(&node, &script, false, rollback).await
    }

    /// Verify a node: poll installed/running and, for cluster members,
    /// cross-check whether the hostname is listed as a member to
    /// disambiguate its role. Updates the record's last-checked stamp.
    pub async fn verify(&self, node_id: &str) -> Result<VerifyReport, OrchestrationError> {
        let node = self.load(node_id).await?;

        let status = self
            .poller
            .poll_status(&node.hops, &commands::status_probe(node.kind))
            .await;

        let member = match node.kind {
            NodeKind::LoadBalancer => false,
            NodeKind::ControlPlane | NodeKind::Worker => {
                self.poller
                    .check_contains(&node.hops, &commands::member_listing(), &node.name)
                    .await
            }
        };

        let role = match node.kind {
            NodeKind::LoadBalancer => None,
            NodeKind::ControlPlane => Some(if node.is_primary() {
                NodeRole::PrimaryControlPlane
            } else {
                NodeRole::SecondaryControlPlane
            }),
            NodeKind::Worker => Some(NodeRole::Worker),
        };

        // Best effort: a concurrent writer bumping the version just means the
        // stamp is skipped this round.
        let mut record = node;
        record.last_checked = Some(SystemTime::now());
        if let Err(e) = self.persistence.save(record).await {
            tracing::debug!("[NodeProvisioner] Skipping last-checked stamp: {}", e);
        }

        Ok(VerifyReport {
            status,
            state: status.state(),
            member,
            role,
        })
    }

    /// Remove a node: guard the primary, tear down its stack, drop its
    /// backend line, delete the record. Remote teardown and the DB delete
    /// are not transactional; the report carries what actually happened.
    pub async fn remove(
        &self,
        node_id: &str,
        stack_id: &str,
    ) -> Result<RemovalStrategyReport, OrchestrationError> {
        let node = self.load(node_id).await?;
        let _lease = self.leases.acquire(format!("node:{}", node.id))?;

        // A primary may only go once no other control-plane record
        // references the same infra. Checked before ANY destructive command.
        if node.is_primary() {
            let peers = self
                .persistence
                .list_peers(&node.infra_id, &node.id, Some(NodeKind::ControlPlane))
                .await?;
            if peers > 0 {
                return Err(OrchestrationError::Precondition(format!(
                    "node {} is the primary control plane and {} control-plane peer(s) remain",
                    node.id, peers
                )));
            }
        }

        let report = self.teardown.teardown(&node.hops, stack_id).await?;

        if node.kind == NodeKind::ControlPlane {
            match self.load_balancer_hops(&node.infra_id, &node.id).await {
                Ok(lb_hops) => {
                    // Failing to drop the backend line must surface before
                    // the record goes away, or the line is orphaned with no
                    // NodeRecord left to reconcile it against.
                    self.backend.remove_backend(&lb_hops, &node.name).await?;
                }
                Err(e) => {
                    // An infra without a registered load balancer has no
                    // backend line to orphan.
                    tracing::debug!(
                        "[NodeProvisioner] No load balancer found for {}: {}",
                        node.infra_id,
                        e
                    );
                }
            }
        }

        self.persistence.delete(&node.id).await?;
        tracing::info!("[NodeProvisioner] Node {} removed ({})", node.id, report.message);
        Ok(report)
    }

    /// Launch the install script for a node in the background.
    async fn launch(
        &self,
        node: &NodeRecord,
        rollback: Option<BackendRollback>,
        extract_secrets: bool,
    ) -> Result<WatchHandle, OrchestrationError> {
        let credential = node
            .hops
            .last()
            .map(|h| h.credential.clone())
            .unwrap_or_default();
        let script = commands::install_script(
            node.kind,
            &credential,
            &self.config.remote.join_command_path(),
        );
        // Only a primary control plane yields join secrets.
        let extract = extract_secrets && node.kind == NodeKind::ControlPlane;
        self.launch_script(node, &script, extract, rollback).await
    }

    /// Write the script, launch it detached, and hand supervision to a
    /// completion watcher. The triggering request returns once the launch
    /// batch succeeds, not once the script finishes.
    async fn launch_script(
        &self,
        node: &NodeRecord,
        script: &str,
        extract_secrets: bool,
        rollback: Option<BackendRollback>,
    ) -> Result<WatchHandle, OrchestrationError> {
        let remote = &self.config.remote;
        let script_path = format!("{}/run-{}.sh", remote.work_dir, node.id);

        let batch = vec![
            format!("mkdir -p {}", remote.work_dir),
            commands::write_script(&script_path, script),
            commands::launch_detached(&script_path, &remote.log_path(), &remote.pid_path()),
        ];

        let results = self
            .executor
            .run_batch(&node.hops, &batch, self.config.timeouts.exec())
            .await?;

        if let Some(failed) = results.iter().find(|r| !r.success()) {
            return Err(OrchestrationError::Precondition(format!(
                "failed to launch provisioning on {}: `{}` exited {}: {}",
                node.id,
                failed.command,
                failed.exit_code,
                failed.stderr.trim()
            )));
        }

        tracing::info!(
            "[NodeProvisioner] Provisioning script launched on {} (log {})",
            node.id,
            remote.log_path()
        );

        let handle = watcher::spawn_watch(
            self.executor.clone(),
            Arc::clone(&self.persistence),
            WatchSpec {
                node_id: node.id.clone(),
                hops: node.hops.clone(),
                log_path: remote.log_path(),
                aux_path: remote.join_command_path(),
                ceiling: self.config.timeouts.watch_ceiling(),
                extract_secrets,
                rollback,
            },
        );
        Ok(handle)
    }

    /// Hop chain of the infra's load balancer.
    async fn load_balancer_hops(
        &self,
        infra_id: &str,
        _excluding: &str,
    ) -> Result<Vec<crate::types::Hop>, OrchestrationError> {
        // Persistence is keyed by node id; the load balancer of an infra is
        // registered under a well-known id.
        let lb_id = format!("{}-lb", infra_id);
        let lb = self.persistence.get(&lb_id).await?.ok_or_else(|| {
            OrchestrationError::Precondition(format!("infra {} has no load balancer", infra_id))
        })?;
        Ok(lb.hops)
    }
}
