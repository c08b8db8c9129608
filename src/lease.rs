//! Per-target mutual-exclusion leases.
//!
//! The remote filesystem and the load-balancer configuration are only
//! protected by back-up-then-overwrite convention, so concurrent
//! reconciliations against the same target are unsafe. A lease must be
//! acquired before any such mutation and is released on drop; a bounded TTL
//! keeps a crashed holder from deadlocking later acquisitions.

use crate::error::OrchestrationError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct LeaseRegistry {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
    ttl: Duration,
}

/// Held lease; dropping it releases the target.
pub struct LeaseGuard {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
    key: String,
}

impl LeaseRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Acquire the lease for `key`, failing fast when a non-expired lease is
    /// already held. Expired entries are reclaimed in place.
    pub fn acquire(&self, key: impl Into<String>) -> Result<LeaseGuard, OrchestrationError> {
        let key = key.into();
        let mut held = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        if let Some(expiry) = held.get(&key) {
            if *expiry > now {
                return Err(OrchestrationError::Lease(format!(
                    "target {} is locked by another reconciliation (expires in {:?})",
                    key,
                    *expiry - now
                )));
            }
            tracing::warn!("[LeaseRegistry] Reclaiming expired lease for {}", key);
        }

        held.insert(key.clone(), now + self.ttl);
        tracing::debug!("[LeaseRegistry] Acquired lease for {} (ttl {:?})", key, self.ttl);

        Ok(LeaseGuard {
            inner: Arc::clone(&self.inner),
            key,
        })
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut held = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
        tracing::debug!("[LeaseRegistry] Released lease for {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let registry = LeaseRegistry::new(Duration::from_secs(60));
        let _guard = registry.acquire("lb:10.0.0.5").unwrap();
        assert!(matches!(
            registry.acquire("lb:10.0.0.5"),
            Err(OrchestrationError::Lease(_))
        ));
        // A different target is unaffected.
        assert!(registry.acquire("node:n1").is_ok());
    }

    #[test]
    fn drop_releases() {
        let registry = LeaseRegistry::new(Duration::from_secs(60));
        {
            let _guard = registry.acquire("lb:10.0.0.5").unwrap();
        }
        assert!(registry.acquire("lb:10.0.0.5").is_ok());
    }

    #[test]
    fn expired_lease_is_reclaimed() {
        let registry = LeaseRegistry::new(Duration::from_millis(0));
        let _guard = registry.acquire("lb:10.0.0.5").unwrap();
        // TTL of zero means the first lease is immediately stale.
        assert!(registry.acquire("lb:10.0.0.5").is_ok());
    }
}
