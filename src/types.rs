//! Core data model: hops, node records, command results, reports.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One SSH-reachable host in an ordered chain. The last hop of a chain is the
/// command-execution target and owns the privilege-escalation credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub host: String,
    pub port: u16,
    /// Login principal on the hop.
    pub principal: String,
    /// Privilege-escalation (sudo) password, piped to `sudo -S` by commands
    /// that need it. Only meaningful on the last hop.
    pub credential: String,
}

impl Hop {
    pub fn new(host: impl Into<String>, port: u16, principal: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            principal: principal.into(),
            credential: String::new(),
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = credential.into();
        self
    }

    /// `principal@host` form used for ssh destinations and ProxyJump entries.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.principal, self.host)
    }
}

/// Role of a managed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    LoadBalancer,
    ControlPlane,
    Worker,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::LoadBalancer => "load-balancer",
            NodeKind::ControlPlane => "control-plane",
            NodeKind::Worker => "worker",
        };
        f.write_str(s)
    }
}

/// Lifecycle state derived from a status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Uninstalled,
    Installing,
    InstalledStopped,
    Running,
}

/// Type-specific sub-state of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    PrimaryControlPlane,
    SecondaryControlPlane,
    Worker,
}

/// Persisted identity and role of a managed host.
///
/// `version` is a monotonic etag: every save must carry the version the
/// writer read, and the store rejects mismatches. This keeps concurrent
/// writers (request threads and background watchers) from silently clobbering
/// each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    /// Cluster (infrastructure) scope the node belongs to.
    pub infra_id: String,
    /// Hostname as known to the cluster membership list.
    pub name: String,
    pub kind: NodeKind,
    /// Ordered tunnel path; the last hop is the execution target.
    pub hops: Vec<Hop>,
    /// Full join command recovered from the primary's provisioning log,
    /// replayed verbatim by joining peers.
    pub join_command: String,
    pub join_token: String,
    pub certificate_key: String,
    pub ha_enabled: bool,
    pub last_checked: Option<SystemTime>,
    pub version: u64,
}

impl NodeRecord {
    pub fn new(
        id: impl Into<String>,
        infra_id: impl Into<String>,
        name: impl Into<String>,
        kind: NodeKind,
        hops: Vec<Hop>,
    ) -> Self {
        Self {
            id: id.into(),
            infra_id: infra_id.into(),
            name: name.into(),
            kind,
            hops,
            join_command: String::new(),
            join_token: String::new(),
            certificate_key: String::new(),
            ha_enabled: false,
            last_checked: None,
            version: 0,
        }
    }

    /// A control-plane record holding a non-empty join token is the primary
    /// control-plane node of its infra.
    pub fn is_primary(&self) -> bool {
        self.kind == NodeKind::ControlPlane && !self.join_token.is_empty()
    }

    /// Address used for the load-balancer backend line.
    pub fn address(&self) -> &str {
        self.hops
            .last()
            .map(|h| h.host.as_str())
            .unwrap_or_default()
    }
}

/// Result of one remote command. Produced per command, ordered, never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Marker-delimited boolean flags extracted from a status probe.
///
/// The conservative default (everything false) is what callers receive when
/// the node is unreachable: an unreachable node must read as down, not as
/// unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    pub installed: bool,
    pub running: bool,
}

impl NodeStatus {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NodeState {
        match (self.installed, self.running) {
            (true, true) => NodeState::Running,
            (true, false) => NodeState::InstalledStopped,
            (false, _) => NodeState::Uninstalled,
        }
    }
}

/// Join credentials recovered from provisioning output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSecrets {
    /// Full join command line, whitespace-normalized.
    pub join_command: String,
    pub join_token: String,
    pub certificate_key: String,
}

/// Outcome of a background installation, produced by the completion watcher
/// and consumed once by persistence.
#[derive(Debug, Clone)]
pub struct InstallationOutcome {
    pub succeeded: bool,
    /// Log excerpt backing the verdict.
    pub evidence: String,
    pub secrets: Option<JoinSecrets>,
}

/// One independent method of removing a container or stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalStrategy {
    /// Compose-level `down` for the discovered manifest.
    ComposeDown,
    /// Direct stop+remove for every declared container name.
    NamedRemoval,
    /// Direct stop+remove for live containers matching the stack id,
    /// discovered before any removal began.
    DiscoveredRemoval,
}

/// Reconciled verdict of a teardown run. Ephemeral, returned to the caller,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalStrategyReport {
    pub compose_down_ok: bool,
    pub named_removal_ok: bool,
    pub discovered_removal_ok: bool,
    /// Strategy credited with the removal, preferring compose > named >
    /// discovered when more than one ran clean.
    pub winning_strategy: Option<RemovalStrategy>,
    /// Command texts that exited non-zero, across all strategies.
    pub failed_commands: Vec<String>,
    /// Targeted container names still present in the final listing.
    pub remaining: Vec<String>,
    pub message: String,
}

impl RemovalStrategyReport {
    pub fn succeeded(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// One row of a tab-separated container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRow {
    pub id: String,
    pub image: String,
    pub status: String,
    pub name: String,
    pub ports: String,
    pub size: String,
    pub created: String,
}
