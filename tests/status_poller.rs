mod common;

use cluster_core::config::PollConfig;
use cluster_core::{NodeState, NodeStatus, StatusPoller};
use common::MockShell;
use std::time::Duration;

fn poller(shell: std::sync::Arc<MockShell>) -> StatusPoller {
    StatusPoller::new(
        common::executor(shell),
        PollConfig::default(),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn probe_parses_sentinel_flags() {
    let shell = MockShell::new();
    shell.respond(
        "status-probe",
        "===START===\nINSTALLED=true\nRUNNING=false\n===END===\n",
    );

    let status = poller(shell.clone())
        .poll_status(&common::hops(), "status-probe")
        .await;

    assert!(status.installed);
    assert!(!status.running);
    assert_eq!(status.state(), NodeState::InstalledStopped);
}

#[tokio::test]
async fn absent_flag_reads_as_false() {
    let shell = MockShell::new();
    shell.respond("status-probe", "===START===\nRUNNING=true\n===END===\n");

    let status = poller(shell.clone())
        .poll_status(&common::hops(), "status-probe")
        .await;

    assert!(!status.installed);
    assert_eq!(status.state(), NodeState::Uninstalled);
}

#[tokio::test(start_paused = true)]
async fn recovers_after_garbled_probe() {
    let shell = MockShell::new();
    // First response lacks the sentinels, second is well-formed.
    shell.respond_once("status-probe", "connection banner noise\n");
    shell.respond(
        "status-probe",
        "===START===\nINSTALLED=true\nRUNNING=true\n===END===\n",
    );

    let status = poller(shell.clone())
        .poll_status(&common::hops(), "status-probe")
        .await;

    assert_eq!(status.state(), NodeState::Running);
    assert_eq!(shell.commands().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_reads_as_down() {
    let shell = MockShell::new();
    shell.refuse_connections();

    let status = poller(shell.clone())
        .poll_status(&common::hops(), "status-probe")
        .await;

    assert_eq!(status, NodeStatus::offline());
    assert_eq!(status.state(), NodeState::Uninstalled);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_default_conservative() {
    let shell = MockShell::new();
    shell.respond("status-probe", "no sentinels here\n");

    let status = poller(shell.clone())
        .poll_status(&common::hops(), "status-probe")
        .await;

    assert_eq!(status, NodeStatus::offline());
    assert_eq!(
        shell.commands().len(),
        PollConfig::default().attempts as usize
    );
}
