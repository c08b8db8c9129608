//! Stack teardown: layered removal strategies reconciled by observation.
//!
//! Compose-level teardown fails silently on manually-created or orphaned
//! containers, so three independent strategies run unconditionally and the
//! verdict comes from comparing the container listing taken before any
//! removal began against the one taken after all strategies finished.

use crate::config::{StackConfig, TimeoutConfig};
use crate::error::OrchestrationError;
use crate::executor::BatchExecutor;
use crate::provision::commands;
use crate::types::{Hop, RemovalStrategy, RemovalStrategyReport};
use crate::wire;
use std::collections::BTreeSet;

#[derive(Clone)]
pub struct StackTeardown {
    executor: BatchExecutor,
    stack: StackConfig,
    timeouts: TimeoutConfig,
}

impl StackTeardown {
    pub fn new(executor: BatchExecutor, stack: StackConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            executor,
            stack,
            timeouts,
        }
    }

    /// Tear down the stack on the target host and reconcile the result.
    pub async fn teardown(
        &self,
        hops: &[Hop],
        stack_id: &str,
    ) -> Result<RemovalStrategyReport, OrchestrationError> {
        let cred = hops.last().map(|h| h.credential.clone()).unwrap_or_default();

        // Manifest discovery gates everything: no manifest, nothing to do.
        let probe = self
            .executor
            .run_one(
                hops,
                &commands::manifest_probe(&self.stack.manifest_dir, stack_id),
                self.timeouts.probe(),
            )
            .await?;
        let manifest = wire::parse_manifest_probe(&probe.stdout);
        let Some(ext) = manifest.extension() else {
            tracing::info!("[StackTeardown] No manifest for stack {}, nothing to remove", stack_id);
            return Ok(RemovalStrategyReport {
                compose_down_ok: true,
                named_removal_ok: true,
                discovered_removal_ok: true,
                winning_strategy: None,
                failed_commands: Vec::new(),
                remaining: Vec::new(),
                message: "no manifest found".to_string(),
            });
        };

        // Target set: catalog names, manifest-declared names, and live
        // containers matching the stack id - all captured BEFORE any removal.
        let pre_batch = vec![
            commands::manifest_container_names(&self.stack.manifest_dir, stack_id, ext),
            commands::container_listing(),
        ];
        let pre_results = self
            .executor
            .run_batch(hops, &pre_batch, self.timeouts.exec())
            .await?;

        let mut declared: BTreeSet<String> = self
            .stack
            .container_catalog
            .iter()
            .map(|suffix| format!("{}-{}", stack_id, suffix))
            .collect();
        declared.extend(
            pre_results[0]
                .stdout
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        );

        let discovered: Vec<String> = wire::parse_container_listing(&pre_results[1].stdout)
            .into_iter()
            .filter(|row| row.name.contains(stack_id))
            .map(|row| row.name)
            .collect();

        let mut targets = declared.clone();
        targets.extend(discovered.iter().cloned());

        tracing::info!(
            "[StackTeardown] Stack {}: {} targeted container(s), manifest .{}",
            stack_id,
            targets.len(),
            ext
        );

        // All three strategies run unconditionally, in one ordered batch;
        // index ranges attribute each result back to its strategy.
        let mut batch = Vec::new();
        batch.push(commands::compose_down(
            &self.stack.manifest_dir,
            stack_id,
            ext,
            &cred,
        ));
        let named_start = batch.len();
        for name in &declared {
            batch.push(commands::stop_container(name, &cred));
            batch.push(commands::remove_container(name, &cred));
        }
        let discovered_start = batch.len();
        for name in &discovered {
            batch.push(commands::stop_container(name, &cred));
            batch.push(commands::remove_container(name, &cred));
        }

        let results = self
            .executor
            .run_batch(hops, &batch, self.timeouts.build())
            .await?;

        let strategy_clean = |range: std::ops::Range<usize>| -> bool {
            results[range].iter().all(|r| r.success())
        };
        let compose_down_ok = strategy_clean(0..named_start);
        let named_removal_ok = strategy_clean(named_start..discovered_start);
        let discovered_removal_ok = strategy_clean(discovered_start..results.len());

        let failed_commands: Vec<String> = results
            .iter()
            .filter(|r| !r.success())
            .map(|r| r.command.clone())
            .collect();

        // One final observation decides the verdict.
        let final_listing = self
            .executor
            .run_one(hops, &commands::container_listing(), self.timeouts.exec())
            .await?;
        let final_names: BTreeSet<String> = wire::parse_container_listing(&final_listing.stdout)
            .into_iter()
            .map(|row| row.name)
            .collect();

        let remaining: Vec<String> = targets
            .iter()
            .filter(|name| final_names.contains(*name))
            .cloned()
            .collect();

        let winning_strategy = if remaining.is_empty() {
            if compose_down_ok {
                Some(RemovalStrategy::ComposeDown)
            } else if named_removal_ok {
                Some(RemovalStrategy::NamedRemoval)
            } else if discovered_removal_ok {
                Some(RemovalStrategy::DiscoveredRemoval)
            } else {
                // Everything reported failures yet the containers are gone;
                // observation wins over sentinels.
                None
            }
        } else {
            None
        };

        let message = if remaining.is_empty() {
            format!("stack {} removed", stack_id)
        } else {
            format!(
                "stack {}: {} container(s) still present after all strategies",
                stack_id,
                remaining.len()
            )
        };

        if !remaining.is_empty() {
            tracing::warn!("[StackTeardown] {}: remaining {:?}", stack_id, remaining);
        } else {
            tracing::info!(
                "[StackTeardown] {} ({} failed command(s), attributed to {:?})",
                message,
                failed_commands.len(),
                winning_strategy
            );
        }

        Ok(RemovalStrategyReport {
            compose_down_ok,
            named_removal_ok,
            discovered_removal_ok,
            winning_strategy,
            failed_commands,
            remaining,
            message,
        })
    }
}
