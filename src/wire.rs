//! All marker and format conventions the remote scripts rely on, in one
//! place.
//!
//! Every heuristic that reads CLI output lives here so that format drift in
//! the underlying tools is caught centrally by the fixture tests at the
//! bottom of this module, not scattered across callers.

use crate::error::TransportErrorKind;
use crate::types::{ContainerRow, JoinSecrets, NodeStatus};
use regex::Regex;
use std::sync::OnceLock;

/// Sentinel bracketing the flag block of a status probe.
pub const SENTINEL_START: &str = "===START===";
/// Closing sentinel of a status probe.
pub const SENTINEL_END: &str = "===END===";

/// Prefix every plausible join command starts with.
pub const JOIN_COMMAND_PREFIX: &str = "kubeadm join";

/// Banner the installer prints immediately before the join command block.
pub const JOIN_BANNER: &str = "You can now join any number of";

/// Marker a finished provisioning script appends to its log.
pub const COMPLETION_MARKER: &str = "PROVISION_COMPLETE";

/// Shell operators (and one known command) that signal the join command
/// picked up trailing contamination from the surrounding script.
const CONTAMINATION_MARKERS: &[&str] = &["&&", "||", ";", "mkdir "];

fn discovery_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"sha256:[0-9a-fA-F]{16,}").expect("static regex"))
}

/// Both sentinels observed in the same response?
pub fn sentinels_present(output: &str) -> bool {
    output.contains(SENTINEL_START) && output.contains(SENTINEL_END)
}

/// Boolean flag by substring search. Absence is false, never unknown.
pub fn flag(output: &str, name: &str) -> bool {
    output.contains(&format!("{}=true", name))
}

/// Parse a sentinel-bracketed status probe. `None` when the sentinels are
/// missing (truncated or garbled response).
pub fn parse_status(output: &str) -> Option<NodeStatus> {
    if !sentinels_present(output) {
        return None;
    }
    Some(NodeStatus {
        installed: flag(output, "INSTALLED"),
        running: flag(output, "RUNNING"),
    })
}

/// Result of a manifest-discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestProbe {
    /// `<stack>.yml` exists.
    Yml,
    /// `<stack>.yaml` exists.
    Yaml,
    /// Probe reported `ERROR:` or nothing recognizable.
    Missing,
}

impl ManifestProbe {
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ManifestProbe::Yml => Some("yml"),
            ManifestProbe::Yaml => Some("yaml"),
            ManifestProbe::Missing => None,
        }
    }
}

/// Manifest probes emit `YML_EXISTS` / `YAML_EXISTS` / an `ERROR:` prefix.
pub fn parse_manifest_probe(output: &str) -> ManifestProbe {
    if output.contains("YML_EXISTS") {
        ManifestProbe::Yml
    } else if output.contains("YAML_EXISTS") {
        ManifestProbe::Yaml
    } else {
        ManifestProbe::Missing
    }
}

/// Parse a tab-separated container listing with the fixed field order
/// id, image, status, name, ports, size, created. Malformed rows are skipped.
pub fn parse_container_listing(output: &str) -> Vec<ContainerRow> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            continue;
        }
        rows.push(ContainerRow {
            id: fields[0].trim().to_string(),
            image: fields[1].trim().to_string(),
            status: fields[2].trim().to_string(),
            name: fields[3].trim().to_string(),
            ports: fields[4].trim().to_string(),
            size: fields[5].trim().to_string(),
            created: fields[6].trim().to_string(),
        });
    }
    rows
}

/// Classify a transport failure from its failure text.
pub fn classify_transport_failure(text: &str) -> TransportErrorKind {
    let lower = text.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        TransportErrorKind::Timeout
    } else if lower.contains("permission denied")
        || lower.contains("authentication")
        || lower.contains("host key verification failed")
        || lower.contains("too many authentication failures")
    {
        TransportErrorKind::Authentication
    } else if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("connection closed")
        || lower.contains("no route to host")
        || lower.contains("could not resolve")
        || lower.contains("network is unreachable")
        || lower.contains("broken pipe")
    {
        TransportErrorKind::Connection
    } else {
        TransportErrorKind::Other
    }
}

/// Truncate a join command at the first contamination marker (trailing shell
/// operators or directory-creation commands dragged in from the script).
pub fn truncate_contamination(command: &str) -> String {
    let mut cut = command.len();
    for marker in CONTAMINATION_MARKERS {
        if let Some(idx) = command.find(marker) {
            cut = cut.min(idx);
        }
    }
    command[..cut].trim().to_string()
}

/// A join command is plausible when it carries the expected prefix and a
/// hash-like discovery token suffix.
pub fn plausible_join_command(candidate: &str) -> bool {
    candidate.contains(JOIN_COMMAND_PREFIX) && discovery_hash_re().is_match(candidate)
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pattern 1: multi-line block following the join banner, newline-joined and
/// whitespace-normalized. Continuation backslashes are dropped by the
/// normalization.
fn extract_after_banner(log: &str) -> Option<String> {
    let lines: Vec<&str> = log.lines().collect();
    let banner_idx = lines.iter().rposition(|l| l.contains(JOIN_BANNER))?;
    let mut block = Vec::new();
    for (offset, line) in lines.iter().skip(banner_idx + 1).enumerate() {
        let trimmed = line.trim();
        if block.is_empty() {
            // The command block sits right under the banner; a command that
            // only appears much later belongs to a different pattern.
            if offset > 10 {
                break;
            }
            if trimmed.is_empty() || !trimmed.contains(JOIN_COMMAND_PREFIX) {
                continue;
            }
            block.push(trimmed.trim_end_matches('\\').trim().to_string());
        } else if trimmed.is_empty() || trimmed.contains(JOIN_BANNER) {
            break;
        } else if trimmed.starts_with("--") || trimmed.ends_with('\\') {
            block.push(trimmed.trim_end_matches('\\').trim().to_string());
        } else {
            break;
        }
    }
    if block.is_empty() {
        return None;
    }
    Some(normalize_whitespace(&block.join(" ")))
}

/// Pattern 2: last line containing the join-command prefix plus the line
/// immediately after it.
fn extract_last_command_line(log: &str) -> Option<String> {
    let lines: Vec<&str> = log.lines().collect();
    let idx = lines
        .iter()
        .rposition(|l| l.contains(JOIN_COMMAND_PREFIX))?;
    let mut candidate = lines[idx].trim().trim_end_matches('\\').trim().to_string();
    if let Some(next) = lines.get(idx + 1) {
        let next = next.trim();
        if !next.is_empty() {
            candidate.push(' ');
            candidate.push_str(next.trim_end_matches('\\').trim());
        }
    }
    Some(normalize_whitespace(&candidate))
}

/// Pattern 3: contents of the auxiliary file the provisioning script writes
/// directly.
fn extract_from_aux_file(aux: Option<&str>) -> Option<String> {
    let aux = aux?;
    if aux.trim().is_empty() {
        return None;
    }
    Some(normalize_whitespace(aux))
}

/// Pattern 4: line-numbered search-and-slice for when the banner text itself
/// is missing. Finds the first join line and slices it together with any
/// option-continuation lines that follow.
fn extract_by_line_slice(log: &str) -> Option<String> {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.iter().position(|l| l.contains(JOIN_COMMAND_PREFIX))?;
    let mut end = start + 1;
    while end < lines.len() {
        let trimmed = lines[end].trim();
        if trimmed.starts_with("--") || lines[end - 1].trim().ends_with('\\') {
            end += 1;
        } else {
            break;
        }
    }
    let slice: Vec<String> = lines[start..end]
        .iter()
        .map(|l| l.trim().trim_end_matches('\\').trim().to_string())
        .collect();
    Some(normalize_whitespace(&slice.join(" ")))
}

fn option_value(command: &str, option: &str) -> String {
    let mut parts = command.split_whitespace();
    while let Some(part) = parts.next() {
        if part == option {
            return parts.next().unwrap_or_default().to_string();
        }
    }
    String::new()
}

fn secrets_from_command(command: &str) -> JoinSecrets {
    JoinSecrets {
        join_token: option_value(command, "--token"),
        certificate_key: option_value(command, "--certificate-key"),
        join_command: command.to_string(),
    }
}

/// Recover join credentials from provisioning output with an ordered fallback
/// of extraction patterns. The first non-empty, plausible result wins.
///
/// `aux` is the separate join-command file the provisioning script writes
/// directly, fetched alongside the log.
pub fn extract_join_secrets(log: &str, aux: Option<&str>) -> Option<JoinSecrets> {
    let patterns: [(&str, Option<String>); 4] = [
        ("banner-block", extract_after_banner(log)),
        ("last-command-line", extract_last_command_line(log)),
        ("aux-file", extract_from_aux_file(aux)),
        ("line-slice", extract_by_line_slice(log)),
    ];

    for (name, candidate) in patterns {
        let Some(candidate) = candidate else { continue };
        let cleaned = truncate_contamination(&candidate);
        if cleaned.is_empty() || !plausible_join_command(&cleaned) {
            tracing::debug!(
                "[SecretExtractor] Pattern {} produced implausible candidate, falling through",
                name
            );
            continue;
        }
        tracing::info!("[SecretExtractor] Join command recovered by pattern {}", name);
        return Some(secrets_from_command(&cleaned));
    }

    tracing::warn!("[SecretExtractor] No extraction pattern produced a plausible join command");
    None
}
