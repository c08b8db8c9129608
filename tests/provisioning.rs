mod common;

use cluster_core::{
    InstallOutcome, MemoryPersistence, NodeKind, NodeProvisioner, NodeState, OrchestrationError,
    OrchestratorConfig, Persistence,
};
use common::MockShell;
use std::sync::Arc;

const JOIN_COMMAND: &str = "kubeadm join 10.0.0.1:6443 --token abc.def \
     --discovery-token-ca-cert-hash sha256:0123456789abcdef0123456789abcdef";

fn provisioner(shell: Arc<MockShell>) -> (NodeProvisioner, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::new());
    let p = NodeProvisioner::new(
        common::executor(shell),
        persistence.clone(),
        OrchestratorConfig::default(),
    );
    (p, persistence)
}

#[tokio::test]
async fn install_refused_when_workloads_are_live() {
    let shell = MockShell::new();
    shell.respond(
        "docker ps -q",
        "===START===\nINSTALLED=true\nWORKLOADS=true\n===END===\n",
    );
    shell.respond(
        "is-active --quiet kubelet",
        "===START===\nINSTALLED=true\nRUNNING=true\n===END===\n",
    );

    let (p, persistence) = provisioner(shell.clone());
    persistence
        .save(common::node("cp-1", NodeKind::ControlPlane))
        .await
        .unwrap();

    match p.install("cp-1").await.unwrap() {
        InstallOutcome::NotRerun(state) => assert_eq!(state, NodeState::Running),
        other => panic!("expected refusal, got {:?}", other),
    }

    // The refusal happens before anything destructive goes over the wire.
    let commands = shell.commands();
    assert!(!commands.iter().any(|c| c.contains("cat > ")));
    assert!(!commands.iter().any(|c| c.contains("nohup")));
    assert!(!commands.iter().any(|c| c.contains("apt-get")));
}

#[tokio::test]
async fn primary_install_persists_extracted_secrets() {
    let shell = MockShell::new();
    shell.respond(
        "docker ps -q",
        "===START===\nINSTALLED=false\nWORKLOADS=false\n===END===\n",
    );
    shell.respond("until grep -q", "");
    // The log carries no join line; the auxiliary file does.
    shell.respond(
        "cat /tmp/cluster-core/provision.log",
        "initializing control plane\nPROVISION_COMPLETE\n",
    );
    shell.respond("cat /tmp/cluster-core/join-command.txt", JOIN_COMMAND);

    let (p, persistence) = provisioner(shell.clone());
    persistence
        .save(common::node("cp-1", NodeKind::ControlPlane))
        .await
        .unwrap();

    let handle = match p.install("cp-1").await.unwrap() {
        InstallOutcome::Launched(handle) => handle,
        other => panic!("expected launch, got {:?}", other),
    };

    let outcome = handle.wait().await.expect("watcher gave up");
    assert!(outcome.succeeded);
    let secrets = outcome.secrets.expect("no secrets extracted");
    assert_eq!(secrets.join_token, "abc.def");

    let record = persistence.get("cp-1").await.unwrap().unwrap();
    assert_eq!(record.join_token, "abc.def");
    assert!(record.join_command.starts_with("kubeadm join 10.0.0.1:6443"));
    assert!(record.is_primary());

    // Script delivery, detached launch, and the remote blocking wait all ran.
    let commands = shell.commands();
    assert!(commands.iter().any(|c| c.contains("<<'CLUSTER_CORE_EOF'")));
    assert!(commands.iter().any(|c| c.contains("nohup sh")));
    assert!(commands.iter().any(|c| c.contains("until grep -q")));
}

#[tokio::test]
async fn empty_extraction_makes_later_joins_fail_fast() {
    let shell = MockShell::new();
    shell.respond(
        "docker ps -q",
        "===START===\nINSTALLED=false\nWORKLOADS=false\n===END===\n",
    );
    shell.respond("until grep -q", "");
    // Neither the log nor the auxiliary file yields a join command.
    shell.respond(
        "cat /tmp/cluster-core/provision.log",
        "initializing control plane\nPROVISION_COMPLETE\n",
    );
    shell.respond("cat /tmp/cluster-core/join-command.txt", "");

    let (p, persistence) = provisioner(shell.clone());
    persistence
        .save(common::node("cp-1", NodeKind::ControlPlane))
        .await
        .unwrap();
    persistence
        .save(common::node("w-1", NodeKind::Worker))
        .await
        .unwrap();

    let handle = match p.install("cp-1").await.unwrap() {
        InstallOutcome::Launched(handle) => handle,
        other => panic!("expected launch, got {:?}", other),
    };
    let outcome = handle.wait().await.expect("watcher gave up");
    assert!(outcome.secrets.is_none());

    let before = shell.commands().len();
    let err = p.join("w-1", "cp-1").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Precondition(_)));
    assert!(err.to_string().contains("join token"));
    // The precondition fires before any remote command.
    assert_eq!(shell.commands().len(), before);
}

#[tokio::test]
async fn control_plane_join_writes_backend_before_launching() {
    let shell = MockShell::new();
    shell.respond("until grep -q", "");

    let (p, persistence) = provisioner(shell.clone());
    let mut primary = common::node("cp-1", NodeKind::ControlPlane);
    primary.join_token = "abc.def".to_string();
    primary.join_command = JOIN_COMMAND.to_string();
    persistence.save(primary).await.unwrap();
    persistence
        .save(common::node("infra-1-lb", NodeKind::LoadBalancer))
        .await
        .unwrap();
    persistence
        .save(common::node("cp-2", NodeKind::ControlPlane))
        .await
        .unwrap();

    let handle = p.join("cp-2", "cp-1").await.unwrap();
    let outcome = handle.wait().await.expect("watcher gave up");
    assert!(outcome.succeeded);

    let commands = shell.commands();
    let insert = commands
        .iter()
        .position(|c| c.contains("server cp-2-host 10.0.0.5:6443 check"))
        .expect("backend insert missing");
    let launch = commands
        .iter()
        .position(|c| c.contains("nohup sh"))
        .expect("detached launch missing");
    assert!(insert < launch);

    // The peer joins as a control plane.
    let script = commands
        .iter()
        .find(|c| c.contains("<<'CLUSTER_CORE_EOF'"))
        .expect("script delivery missing");
    assert!(script.contains("--control-plane"));
}

#[tokio::test]
async fn failed_join_rolls_the_backend_line_back() {
    let shell = MockShell::new();
    // The completion marker never appears.
    shell.fail_with("until grep -q", 124, "");

    let (p, persistence) = provisioner(shell.clone());
    let mut primary = common::node("cp-1", NodeKind::ControlPlane);
    primary.join_token = "abc.def".to_string();
    primary.join_command = JOIN_COMMAND.to_string();
    persistence.save(primary).await.unwrap();
    persistence
        .save(common::node("infra-1-lb", NodeKind::LoadBalancer))
        .await
        .unwrap();
    persistence
        .save(common::node("cp-2", NodeKind::ControlPlane))
        .await
        .unwrap();

    let handle = p.join("cp-2", "cp-1").await.unwrap();
    assert!(handle.wait().await.is_none());

    // Two purges: one inside the initial insert batch, one from the rollback.
    let commands = shell.commands();
    let purges = commands
        .iter()
        .filter(|c| c.contains("/server cp-2-host /d"))
        .count();
    assert_eq!(purges, 2);
    // The rollback purge comes after the failed wait.
    let wait = commands
        .iter()
        .position(|c| c.contains("until grep -q"))
        .unwrap();
    let last_purge = commands
        .iter()
        .rposition(|c| c.contains("/server cp-2-host /d"))
        .unwrap();
    assert!(last_purge > wait);
}

#[tokio::test]
async fn second_control_plane_install_refused_once_a_primary_exists() {
    let shell = MockShell::new();

    let (p, persistence) = provisioner(shell.clone());
    let mut primary = common::node("cp-1", NodeKind::ControlPlane);
    primary.join_token = "abc.def".to_string();
    persistence.save(primary).await.unwrap();
    persistence
        .save(common::node("cp-2", NodeKind::ControlPlane))
        .await
        .unwrap();

    // cp-2 would run cluster init and mint a second join token; it has to
    // join through cp-1 instead.
    let err = p.install("cp-2").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Precondition(_)));
    assert!(err.to_string().contains("join cp-2 instead"));
    assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn primary_reinstall_is_not_blocked_by_its_own_token() {
    let shell = MockShell::new();
    shell.respond(
        "docker ps -q",
        "===START===\nINSTALLED=true\nWORKLOADS=true\n===END===\n",
    );
    shell.respond(
        "is-active --quiet kubelet",
        "===START===\nINSTALLED=true\nRUNNING=true\n===END===\n",
    );

    let (p, persistence) = provisioner(shell.clone());
    let mut primary = common::node("cp-1", NodeKind::ControlPlane);
    primary.join_token = "abc.def".to_string();
    persistence.save(primary).await.unwrap();

    // The primary reaches its normal idempotency pre-check rather than the
    // second-primary refusal.
    match p.install("cp-1").await.unwrap() {
        InstallOutcome::NotRerun(state) => assert_eq!(state, NodeState::Running),
        other => panic!("expected refusal, got {:?}", other),
    }
}

#[tokio::test]
async fn backend_removal_failure_keeps_the_record() {
    let shell = MockShell::new();
    shell.respond("if [ -f /opt/stacks/app1.yml ]", "ERROR: no manifest for app1\n");
    shell.fail_with("haproxy -c -f", 1, "parsing error\n");

    let (p, persistence) = provisioner(shell.clone());
    let mut primary = common::node("cp-1", NodeKind::ControlPlane);
    primary.join_token = "abc.def".to_string();
    persistence.save(primary).await.unwrap();
    persistence
        .save(common::node("infra-1-lb", NodeKind::LoadBalancer))
        .await
        .unwrap();

    let err = p.remove("cp-1", "app1").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Reconciliation(_)));
    // The record survives so the orphaned backend line stays attributable
    // and the removal can be retried.
    assert!(persistence.get("cp-1").await.unwrap().is_some());
}

#[tokio::test]
async fn primary_removal_guard_blocks_before_any_remote_command() {
    let shell = MockShell::new();

    let (p, persistence) = provisioner(shell.clone());
    let mut primary = common::node("cp-1", NodeKind::ControlPlane);
    primary.join_token = "abc.def".to_string();
    persistence.save(primary).await.unwrap();
    persistence
        .save(common::node("cp-2", NodeKind::ControlPlane))
        .await
        .unwrap();

    let err = p.remove("cp-1", "app1").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Precondition(_)));
    assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn worker_removal_deletes_the_record() {
    let shell = MockShell::new();
    shell.respond("if [ -f /opt/stacks/app1.yml ]", "ERROR: no manifest for app1\n");

    let (p, persistence) = provisioner(shell.clone());
    persistence
        .save(common::node("w-1", NodeKind::Worker))
        .await
        .unwrap();

    let report = p.remove("w-1", "app1").await.unwrap();
    assert!(report.succeeded());
    assert!(persistence.get("w-1").await.unwrap().is_none());
}

#[tokio::test]
async fn verify_cross_checks_cluster_membership() {
    let shell = MockShell::new();
    shell.respond(
        "is-active --quiet kubelet",
        "===START===\nINSTALLED=true\nRUNNING=true\n===END===\n",
    );
    shell.respond("kubectl get nodes", "cp-1-host\nother-node\n");

    let (p, persistence) = provisioner(shell.clone());
    persistence
        .save(common::node("cp-1", NodeKind::ControlPlane))
        .await
        .unwrap();

    let report = p.verify("cp-1").await.unwrap();
    assert_eq!(report.state, NodeState::Running);
    assert!(report.member);

    let record = persistence.get("cp-1").await.unwrap().unwrap();
    assert!(record.last_checked.is_some());
}
