#![allow(dead_code)]

//! Shared test transport: a scripted in-memory shell standing in for ssh.

use async_trait::async_trait;
use cluster_core::{
    BatchExecutor, CommandResult, Hop, NodeKind, NodeRecord, OrchestrationError, RemoteShell,
    ShellSession, TransportErrorKind,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Rule {
    needle: String,
    stdout: String,
    stderr: String,
    exit_code: i32,
    once: bool,
}

/// Scripted transport. Responses are matched by substring of the command
/// text, first rule wins; unmatched commands succeed with empty output.
/// Every executed command is recorded in order.
#[derive(Default)]
pub struct MockShell {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
    refuse_open: Mutex<bool>,
}

impl MockShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, needle: &str, stdout: &str) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            once: false,
        });
    }

    /// One-shot rule, consumed on first match. Registered rules are matched
    /// in insertion order, so a one-shot followed by a persistent rule for
    /// the same needle yields a sequence.
    pub fn respond_once(&self, needle: &str, stdout: &str) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            once: true,
        });
    }

    pub fn fail_with(&self, needle: &str, exit_code: i32, stderr: &str) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
            once: false,
        });
    }

    /// Make every subsequent open() fail with a connection error.
    pub fn refuse_connections(&self) {
        *self.refuse_open.lock().unwrap() = true;
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn open(&self, hops: &[Hop]) -> Result<ShellSession, OrchestrationError> {
        if *self.refuse_open.lock().unwrap() {
            return Err(OrchestrationError::transport(
                TransportErrorKind::Connection,
                "scripted connection refusal",
            ));
        }
        let target = hops
            .last()
            .ok_or_else(|| OrchestrationError::Config("empty hop chain".to_string()))?
            .clone();
        Ok(ShellSession::direct(target))
    }

    async fn run(
        &self,
        _session: &ShellSession,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, OrchestrationError> {
        self.log.lock().unwrap().push(command.to_string());
        let mut rules = self.rules.lock().unwrap();
        let hit = rules.iter().position(|r| command.contains(&r.needle));
        Ok(match hit {
            Some(i) => {
                let result = CommandResult {
                    command: command.to_string(),
                    stdout: rules[i].stdout.clone(),
                    stderr: rules[i].stderr.clone(),
                    exit_code: rules[i].exit_code,
                };
                if rules[i].once {
                    rules.remove(i);
                }
                result
            }
            None => CommandResult {
                command: command.to_string(),
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            },
        })
    }

    async fn close(&self, _session: ShellSession) -> Result<(), OrchestrationError> {
        Ok(())
    }
}

pub fn executor(shell: Arc<MockShell>) -> BatchExecutor {
    BatchExecutor::new(shell)
}

/// Two-hop chain: bastion, then the execution target with a sudo credential.
pub fn hops() -> Vec<Hop> {
    vec![
        Hop::new("bastion.example", 22, "ops"),
        Hop::new("10.0.0.5", 22, "ops").with_credential("hunter2"),
    ]
}

pub fn node(id: &str, kind: NodeKind) -> NodeRecord {
    NodeRecord::new(id, "infra-1", format!("{}-host", id), kind, hops())
}
