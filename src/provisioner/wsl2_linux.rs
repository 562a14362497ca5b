//! WSL2 / systemd-Linux install steps: daemon JSON config merge and the
//! systemd drop-in that appends a dedicated listening socket.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{ContainAiError, Result};

pub const DAEMON_CONFIG_RELATIVE: &str = "etc/docker/daemon.json";
pub const DROPIN_RELATIVE: &str = "etc/systemd/system/docker.service.d/containai-secure.conf";

/// Merge the hardened runtime into a daemon JSON config under `root`,
/// backing up the prior version with a timestamp suffix. Hard-fails if the
/// existing file exists but is not valid JSON.
pub fn merge_daemon_config(
    root: &Path,
    runtime_name: &str,
    runtime_binary_path: &str,
    backup_suffix: &str,
) -> Result<String> {
    let path = root.join(DAEMON_CONFIG_RELATIVE);
    let mut doc: Map<String, Value> = if path.is_file() {
        let raw = std::fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
            ContainAiError::precondition(
                format!("existing daemon config at {} is malformed JSON: {e}", path.display()),
                Some("fix or remove the file by hand, then re-run `cai setup`".to_string()),
            )
        })?;
        match parsed {
            Value::Object(m) => m,
            _ => {
                return Err(ContainAiError::precondition(
                    format!("existing daemon config at {} is not a JSON object", path.display()),
                    Some("fix or remove the file by hand, then re-run `cai setup`".to_string()),
                ))
            }
        }
    } else {
        Map::new()
    };

    if path.is_file() {
        let backup = path.with_extension(format!("json.{backup_suffix}.bak"));
        std::fs::copy(&path, &backup)?;
    }

    let runtimes = doc
        .entry("runtimes".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(runtimes_map) = runtimes {
        let mut entry = Map::new();
        entry.insert("path".to_string(), Value::String(runtime_binary_path.to_string()));
        runtimes_map.insert(runtime_name.to_string(), Value::Object(entry));
    }

    let rendered = serde_json::to_string_pretty(&Value::Object(doc))
        .map_err(|e| ContainAiError::Other(anyhow::anyhow!(e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &rendered)?;
    Ok(rendered)
}

/// Render a systemd drop-in that appends `-H unix://<socket>` to whatever
/// `ExecStart=` the base unit already declares, preserving all prior flags.
/// `existing_exec_start` is the `ExecStart=...` line read from the base unit
/// (or a sane default when none is found).
pub fn render_systemd_dropin(existing_exec_start: &str, dedicated_socket: &str) -> String {
    let trimmed = existing_exec_start.trim_start_matches("ExecStart=").trim();
    format!(
        "[Service]\nExecStart=\nExecStart={trimmed} -H unix://{dedicated_socket}\n",
    )
}

/// Extract the `ExecStart=` line from a base systemd unit file, if present.
pub fn extract_exec_start(unit_contents: &str) -> Option<String> {
    unit_contents
        .lines()
        .find(|l| l.trim_start().starts_with("ExecStart="))
        .map(str::to_string)
}
