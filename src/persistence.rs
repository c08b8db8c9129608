//! Persistence collaborator interface.
//!
//! The core treats the store as synchronous and authoritative and performs no
//! caching. Saves are version-checked: a writer must present the version it
//! read, and a mismatch fails loudly instead of last-write-wins. This is what
//! keeps a background watcher and a concurrent status check from silently
//! clobbering each other's NodeRecord updates.

use crate::error::OrchestrationError;
use crate::types::{NodeKind, NodeRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get(&self, node_id: &str) -> Result<Option<NodeRecord>, OrchestrationError>;

    /// Version-checked save. The stored record's version must equal
    /// `record.version`; on success the stored version is bumped and the
    /// updated record returned. New records must carry version 0.
    async fn save(&self, record: NodeRecord) -> Result<NodeRecord, OrchestrationError>;

    async fn delete(&self, node_id: &str) -> Result<(), OrchestrationError>;

    /// The infra's primary control-plane record, if one exists. At most one
    /// record per infra may hold a non-empty join token.
    async fn find_primary(
        &self,
        infra_id: &str,
    ) -> Result<Option<NodeRecord>, OrchestrationError>;

    /// Count peers in the same infra, excluding one node, optionally
    /// filtered by kind.
    async fn list_peers(
        &self,
        infra_id: &str,
        excluding: &str,
        kind: Option<NodeKind>,
    ) -> Result<usize, OrchestrationError>;
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, NodeRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, NodeRecord>> {
        // Lock poisoning only happens when a holder panicked; the map itself
        // stays consistent, so keep going with the inner value.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn get(&self, node_id: &str) -> Result<Option<NodeRecord>, OrchestrationError> {
        Ok(self.lock().get(node_id).cloned())
    }

    async fn save(&self, mut record: NodeRecord) -> Result<NodeRecord, OrchestrationError> {
        let mut records = self.lock();
        if let Some(existing) = records.get(&record.id) {
            if existing.version != record.version {
                return Err(OrchestrationError::VersionConflict(format!(
                    "node {}: save carries version {} but store holds {}",
                    record.id, record.version, existing.version
                )));
            }
        } else if record.version != 0 {
            return Err(OrchestrationError::VersionConflict(format!(
                "node {}: new record must carry version 0, got {}",
                record.id, record.version
            )));
        }
        record.version += 1;
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn delete(&self, node_id: &str) -> Result<(), OrchestrationError> {
        self.lock().remove(node_id);
        Ok(())
    }

    async fn find_primary(
        &self,
        infra_id: &str,
    ) -> Result<Option<NodeRecord>, OrchestrationError> {
        Ok(self
            .lock()
            .values()
            .find(|r| r.infra_id == infra_id && r.is_primary())
            .cloned())
    }

    async fn list_peers(
        &self,
        infra_id: &str,
        excluding: &str,
        kind: Option<NodeKind>,
    ) -> Result<usize, OrchestrationError> {
        let records = self.lock();
        let count = records
            .values()
            .filter(|r| r.infra_id == infra_id && r.id != excluding)
            .filter(|r| kind.map(|k| r.kind == k).unwrap_or(true))
            .count();
        Ok(count)
    }
}
