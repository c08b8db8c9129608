//! Remote command catalog.
//!
//! Every shell command the orchestrator issues is built here, so the wire
//! conventions (sudo credential piping, sentinel framing, heredoc script
//! delivery) live next to each other and drift in one place.

use crate::types::NodeKind;
use crate::wire::{COMPLETION_MARKER, SENTINEL_END, SENTINEL_START};

/// Wrap a command for privilege escalation: the credential is piped into the
/// sudo prompt, never placed on the command line of the escalated command
/// itself.
pub fn sudo_pipe(credential: &str, command: &str) -> String {
    let escaped = command.replace('\'', "'\"'\"'");
    format!("echo '{}' | sudo -S sh -c '{}'", credential, escaped)
}

/// Sentinel-bracketed status probe for a node type.
pub fn status_probe(kind: NodeKind) -> String {
    match kind {
        NodeKind::LoadBalancer => format!(
            "echo {start}; \
             if command -v haproxy >/dev/null 2>&1; then echo INSTALLED=true; else echo INSTALLED=false; fi; \
             if systemctl is-active --quiet haproxy; then echo RUNNING=true; else echo RUNNING=false; fi; \
             echo {end}",
            start = SENTINEL_START,
            end = SENTINEL_END
        ),
        NodeKind::ControlPlane | NodeKind::Worker => format!(
            "echo {start}; \
             if command -v kubeadm >/dev/null 2>&1; then echo INSTALLED=true; else echo INSTALLED=false; fi; \
             if systemctl is-active --quiet kubelet; then echo RUNNING=true; else echo RUNNING=false; fi; \
             echo {end}",
            start = SENTINEL_START,
            end = SENTINEL_END
        ),
    }
}

/// Pre-install idempotency probe: does the target binary already report a
/// version, and are live workloads present?
pub fn install_precheck(kind: NodeKind) -> String {
    let binary = match kind {
        NodeKind::LoadBalancer => "haproxy -v",
        NodeKind::ControlPlane | NodeKind::Worker => "kubeadm version -o short",
    };
    format!(
        "echo {start}; \
         if {binary} >/dev/null 2>&1; then echo INSTALLED=true; else echo INSTALLED=false; fi; \
         if [ \"$(docker ps -q 2>/dev/null | wc -l)\" -gt 0 ]; then echo WORKLOADS=true; else echo WORKLOADS=false; fi; \
         echo {end}",
        start = SENTINEL_START,
        binary = binary,
        end = SENTINEL_END
    )
}

/// Deliver a script body to the remote host via quoted heredoc (no variable
/// expansion on the way in).
pub fn write_script(path: &str, body: &str) -> String {
    format!("cat > {} <<'CLUSTER_CORE_EOF'\n{}\nCLUSTER_CORE_EOF", path, body)
}

/// Launch a script detached from the calling session, output to the
/// well-known log path, PID recorded for later inspection.
pub fn launch_detached(script_path: &str, log_path: &str, pid_path: &str) -> String {
    format!(
        "nohup sh {} > {} 2>&1 & echo $! > {}",
        script_path, log_path, pid_path
    )
}

/// Remote-side blocking wait: a single round trip that returns when the
/// completion marker appears in the log, or exits non-zero at the ceiling.
pub fn completion_wait(log_path: &str, marker: &str, ceiling_secs: u64) -> String {
    format!(
        "timeout {} sh -c 'until grep -q \"{}\" {} 2>/dev/null; do sleep 5; done'",
        ceiling_secs, marker, log_path
    )
}

pub fn read_file(path: &str) -> String {
    format!("cat {} 2>/dev/null", path)
}

/// Cluster member listing, one node name per line.
pub fn member_listing() -> String {
    "kubectl get nodes --no-headers -o custom-columns=NAME:.metadata.name 2>/dev/null".to_string()
}

/// Installation script for a node type. The script appends the completion
/// marker as its last action, so the watcher's grep races nothing.
pub fn install_script(kind: NodeKind, credential: &str, join_command_path: &str) -> String {
    match kind {
        NodeKind::LoadBalancer => format!(
            "set -e\n\
             {install}\n\
             {enable}\n\
             echo {marker}",
            install = sudo_pipe(credential, "apt-get update -q && apt-get install -y -q haproxy"),
            enable = sudo_pipe(credential, "systemctl enable --now haproxy"),
            marker = COMPLETION_MARKER
        ),
        NodeKind::ControlPlane => format!(
            "set -e\n\
             {init}\n\
             {kubeconfig}\n\
             {print_join}\n\
             echo {marker}",
            init = sudo_pipe(credential, "kubeadm init --upload-certs"),
            kubeconfig = sudo_pipe(
                credential,
                "mkdir -p $HOME/.kube && cp -f /etc/kubernetes/admin.conf $HOME/.kube/config"
            ),
            print_join = sudo_pipe(
                credential,
                &format!(
                    "kubeadm token create --print-join-command > {}",
                    join_command_path
                )
            ),
            marker = COMPLETION_MARKER
        ),
        NodeKind::Worker => format!(
            "set -e\n\
             {install}\n\
             echo {marker}",
            install = sudo_pipe(
                credential,
                "apt-get update -q && apt-get install -y -q kubeadm kubelet kubectl"
            ),
            marker = COMPLETION_MARKER
        ),
    }
}

/// Join script for a new member. Control-plane peers join with
/// `--control-plane` and the certificate key; workers join plain.
pub fn join_script(
    join_command: &str,
    credential: &str,
    control_plane: bool,
    certificate_key: &str,
) -> String {
    let mut command = join_command.to_string();
    if control_plane && !command.contains("--control-plane") {
        command.push_str(" --control-plane");
        if !certificate_key.is_empty() && !command.contains("--certificate-key") {
            command.push_str(&format!(" --certificate-key {}", certificate_key));
        }
    }
    format!(
        "set -e\n{join}\necho {marker}",
        join = sudo_pipe(credential, &command),
        marker = COMPLETION_MARKER
    )
}

/// Manifest-discovery probe: `YML_EXISTS` / `YAML_EXISTS` / `ERROR:` prefix.
pub fn manifest_probe(manifest_dir: &str, stack_id: &str) -> String {
    format!(
        "if [ -f {dir}/{stack}.yml ]; then echo YML_EXISTS; \
         elif [ -f {dir}/{stack}.yaml ]; then echo YAML_EXISTS; \
         else echo 'ERROR: no manifest for {stack}'; fi",
        dir = manifest_dir,
        stack = stack_id
    )
}

/// Tab-separated container listing with the fixed field order the parser
/// expects: id, image, status, name, ports, size, created.
pub fn container_listing() -> String {
    "docker ps -a --format '{{.ID}}\t{{.Image}}\t{{.Status}}\t{{.Names}}\t{{.Ports}}\t{{.Size}}\t{{.CreatedAt}}'"
        .to_string()
}

/// Container names declared inside the manifest.
pub fn manifest_container_names(manifest_dir: &str, stack_id: &str, ext: &str) -> String {
    format!(
        "grep -E '^[[:space:]]*container_name:' {}/{}.{} | awk '{{print $2}}'",
        manifest_dir, stack_id, ext
    )
}

pub fn compose_down(manifest_dir: &str, stack_id: &str, ext: &str, credential: &str) -> String {
    sudo_pipe(
        credential,
        &format!(
            "cd {dir} && docker compose -f {stack}.{ext} down --remove-orphans",
            dir = manifest_dir,
            stack = stack_id,
            ext = ext
        ),
    )
}

pub fn stop_container(name: &str, credential: &str) -> String {
    sudo_pipe(credential, &format!("docker stop {}", name))
}

pub fn remove_container(name: &str, credential: &str) -> String {
    sudo_pipe(credential, &format!("docker rm -f {}", name))
}

// Load-balancer configuration surgery. The backup/restore pair brackets every
// rewrite; validation runs before the service is touched.

pub fn backup_lb_config(config_path: &str, credential: &str) -> String {
    sudo_pipe(
        credential,
        &format!("cp -f {path} {path}.bak", path = config_path),
    )
}

/// Delete every backend line for the node, wherever it ended up.
pub fn purge_backend_lines(config_path: &str, node_name: &str, credential: &str) -> String {
    sudo_pipe(
        credential,
        &format!("sed -i \"/server {} /d\" {}", node_name, config_path),
    )
}

/// Append exactly one backend line under the backend section header.
pub fn insert_backend_line(
    config_path: &str,
    backend_section: &str,
    node_name: &str,
    address: &str,
    port: u16,
    credential: &str,
) -> String {
    sudo_pipe(
        credential,
        &format!(
            "sed -i \"/^{section}/a\\    server {name} {addr}:{port} check\" {path}",
            section = backend_section,
            name = node_name,
            addr = address,
            port = port,
            path = config_path
        ),
    )
}

pub fn validate_lb_config(config_path: &str, credential: &str) -> String {
    sudo_pipe(credential, &format!("haproxy -c -f {}", config_path))
}

pub fn restart_service(service: &str, credential: &str) -> String {
    sudo_pipe(credential, &format!("systemctl restart {}", service))
}

pub fn restore_lb_backup(config_path: &str, credential: &str) -> String {
    sudo_pipe(
        credential,
        &format!("cp -f {path}.bak {path}", path = config_path),
    )
}
