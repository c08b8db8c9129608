//! Orchestrator configuration.
//! Loaded from cluster-core.toml; every field has a serde default so a
//! missing file yields a usable configuration.

use crate::error::OrchestrationError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for short status probes (seconds).
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Default timeout for ordinary command batches (seconds).
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;

/// Default timeout for install/build batches (seconds).
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;

/// Ceiling for the remote completion wait (seconds, 30 minutes).
pub const DEFAULT_WATCH_CEILING_SECS: u64 = 1800;

/// Maximum status-poll attempts.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Sleep between early poll attempts (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Number of leading attempts that sleep before retrying.
pub const DEFAULT_EAGER_ATTEMPTS: u32 = 3;

/// Bounded lease lifetime (seconds) so a crashed holder cannot deadlock
/// later reconciliations.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_exec_secs")]
    pub exec_secs: u64,
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
    #[serde(default = "default_watch_ceiling_secs")]
    pub watch_ceiling_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            exec_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            build_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            watch_ceiling_secs: DEFAULT_WATCH_CEILING_SECS,
        }
    }
}

impl TimeoutConfig {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
    pub fn exec(&self) -> Duration {
        Duration::from_secs(self.exec_secs)
    }
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }
    pub fn watch_ceiling(&self) -> Duration {
        Duration::from_secs(self.watch_ceiling_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_attempts")]
    pub attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Only the first `eager_attempts` retries sleep before re-probing.
    #[serde(default = "default_eager_attempts")]
    pub eager_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            eager_attempts: DEFAULT_EAGER_ATTEMPTS,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Remote filesystem layout the provisioning scripts rely on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePaths {
    /// Per-stack working directory on the target host.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Log file name the detached provisioning script writes to.
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// PID file name for the detached script.
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    /// Separate file the provisioning script writes the join command to.
    #[serde(default = "default_join_command_file")]
    pub join_command_file: String,
}

impl Default for RemotePaths {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_file: default_log_file(),
            pid_file: default_pid_file(),
            join_command_file: default_join_command_file(),
        }
    }
}

impl RemotePaths {
    pub fn log_path(&self) -> String {
        format!("{}/{}", self.work_dir, self.log_file)
    }
    pub fn pid_path(&self) -> String {
        format!("{}/{}", self.work_dir, self.pid_file)
    }
    pub fn join_command_path(&self) -> String {
        format!("{}/{}", self.work_dir, self.join_command_file)
    }
}

/// Load-balancer reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_lb_config_path")]
    pub config_path: String,
    /// Section header the backend lines live under.
    #[serde(default = "default_backend_section")]
    pub backend_section: String,
    #[serde(default = "default_lb_service")]
    pub service: String,
    /// Port the backend lines route to.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            config_path: default_lb_config_path(),
            backend_section: default_backend_section(),
            service: default_lb_service(),
            api_port: default_api_port(),
        }
    }
}

/// Stack teardown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Directory the stack manifests live in.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: String,
    /// Fixed catalog of container-name suffixes every stack declares.
    #[serde(default = "default_container_catalog")]
    pub container_catalog: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            manifest_dir: default_manifest_dir(),
            container_catalog: default_container_catalog(),
        }
    }
}

/// Top-level orchestrator configuration, loaded from cluster-core.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub remote: RemotePaths,
    #[serde(default)]
    pub loadbalancer: LoadBalancerConfig,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            poll: PollConfig::default(),
            remote: RemotePaths::default(),
            loadbalancer: LoadBalancerConfig::default(),
            stack: StackConfig::default(),
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file, trying multiple locations.
    /// Falls back to defaults when no file is found.
    pub fn load(app_dir: &std::path::Path) -> Result<Self, OrchestrationError> {
        let config_paths = vec![
            PathBuf::from("cluster-core.toml"),
            app_dir.join("cluster-core.toml"),
        ];

        for path in config_paths {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    OrchestrationError::Config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    ))
                })?;

                let config: OrchestratorConfig = toml::from_str(&content).map_err(|e| {
                    OrchestrationError::Config(format!(
                        "Failed to parse config file {:?}: {}",
                        path, e
                    ))
                })?;

                tracing::info!("Loaded orchestrator config from {:?}", path);
                return Ok(config);
            }
        }

        tracing::warn!("No cluster-core.toml found, using defaults");
        Ok(Self::default())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

fn default_probe_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}
fn default_exec_secs() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}
fn default_build_secs() -> u64 {
    DEFAULT_BUILD_TIMEOUT_SECS
}
fn default_watch_ceiling_secs() -> u64 {
    DEFAULT_WATCH_CEILING_SECS
}
fn default_poll_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_eager_attempts() -> u32 {
    DEFAULT_EAGER_ATTEMPTS
}
fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}
fn default_work_dir() -> String {
    "/tmp/cluster-core".to_string()
}
fn default_log_file() -> String {
    "provision.log".to_string()
}
fn default_pid_file() -> String {
    "provision.pid".to_string()
}
fn default_join_command_file() -> String {
    "join-command.txt".to_string()
}
fn default_lb_config_path() -> String {
    "/etc/haproxy/haproxy.cfg".to_string()
}
fn default_backend_section() -> String {
    "backend k8s_api".to_string()
}
fn default_lb_service() -> String {
    "haproxy".to_string()
}
fn default_api_port() -> u16 {
    6443
}
fn default_manifest_dir() -> String {
    "/opt/stacks".to_string()
}
fn default_container_catalog() -> Vec<String> {
    vec![
        "web".to_string(),
        "db".to_string(),
        "redis".to_string(),
        "worker".to_string(),
    ]
}
