//! Container name derivation and sanitization (§3 Container identity).

use std::path::Path;

use crate::git;

const FALLBACK_NAME: &str = "containai-workspace";

/// `{repo-basename}-{branch-or-detached-sha}` when `workspace` is inside a
/// git checkout; otherwise the workspace basename. Always sanitized and
/// never empty.
pub fn derive_container_name(workspace: &Path) -> String {
    let raw = match git::repo_root(workspace) {
        Some(root) => {
            let repo_basename = root
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or(FALLBACK_NAME);
            match git::branch_or_detached_sha(workspace) {
                Some(branch) => format!("{repo_basename}-{branch}"),
                None => repo_basename.to_string(),
            }
        }
        None => workspace
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(FALLBACK_NAME)
            .to_string(),
    };
    sanitize(&raw)
}

/// Lowercase `[a-z0-9-]{1,63}`, no leading/trailing dash, guaranteed
/// non-empty.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for c in raw.chars() {
        let lowered = c.to_ascii_lowercase();
        if lowered.is_ascii_alphanumeric() {
            out.push(lowered);
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(63);
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        out
    }
}
