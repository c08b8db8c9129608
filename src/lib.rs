//! Cluster provisioning and teardown orchestration core.
//!
//! Drives remote hosts over ssh hop chains: ordered command batches, bounded
//! status polling, install/join/verify/remove state transitions, background
//! completion watching with join-secret extraction, load-balancer backend
//! reconciliation, and layered stack teardown.

pub mod config;
pub mod error;
pub mod executor;
pub mod lease;
pub mod loadbalancer;
pub mod persistence;
pub mod poller;
pub mod provision;
pub mod teardown;
pub mod transport;
pub mod types;
pub mod wire;

pub use config::OrchestratorConfig;
pub use error::{OrchestrationError, TransportErrorKind};
pub use executor::BatchExecutor;
pub use lease::{LeaseGuard, LeaseRegistry};
pub use loadbalancer::BackendReconciler;
pub use persistence::{MemoryPersistence, Persistence};
pub use poller::StatusPoller;
pub use provision::watcher::{WatchHandle, WatchPhase, WatchStatus};
pub use provision::{InstallOutcome, NodeProvisioner, VerifyReport};
pub use teardown::StackTeardown;
pub use transport::{RemoteShell, ShellSession, SshShell};
pub use types::{
    CommandResult, ContainerRow, Hop, InstallationOutcome, JoinSecrets, NodeKind, NodeRecord,
    NodeRole, NodeState, NodeStatus, RemovalStrategy, RemovalStrategyReport,
};
