//! Central stderr-substring → reason-class table.
//!
//! Every other place that used to grep the container CLI's stderr for a
//! handful of ad-hoc substrings now calls [`classify`] instead, so the
//! mapping is kept in exactly one place.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    DaemonNotRunning,
    PermissionDenied,
    ContextMissing,
    NotRecognizedSubcommand,
    PolicyDisabled,
    NoSuchObject,
    Unknown,
}

impl ReasonClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonClass::DaemonNotRunning => "daemon-not-running",
            ReasonClass::PermissionDenied => "permission-denied",
            ReasonClass::ContextMissing => "context-missing",
            ReasonClass::NotRecognizedSubcommand => "not-recognized-subcommand",
            ReasonClass::PolicyDisabled => "policy-disabled",
            ReasonClass::NoSuchObject => "no-such-object",
            ReasonClass::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ReasonClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (class, substrings) table, checked in order; the first match wins. Kept as
/// a flat table rather than per-call-site `.contains(...)` chains so adding a
/// new CLI error message only touches one place.
const TABLE: &[(ReasonClass, &[&str])] = &[
    (
        ReasonClass::DaemonNotRunning,
        &[
            "cannot connect to the docker daemon",
            "is the docker daemon running",
            "docker daemon is not running",
            "connection refused",
        ],
    ),
    (
        ReasonClass::PermissionDenied,
        &[
            "permission denied",
            "got permission denied",
            "dial unix",
            "access denied",
        ],
    ),
    (
        ReasonClass::ContextMissing,
        &[
            "context not found",
            "no such context",
            "context \"",
        ],
    ),
    (
        ReasonClass::NotRecognizedSubcommand,
        &[
            "unknown command",
            "is not a docker command",
            "not a recognized",
        ],
    ),
    (
        ReasonClass::PolicyDisabled,
        &[
            "disabled by policy",
            "blocked by policy",
            "not permitted by policy",
        ],
    ),
    (
        ReasonClass::NoSuchObject,
        &[
            "no such container",
            "no such volume",
            "no such image",
            "no such object",
        ],
    ),
];

/// Classify raw CLI stderr into a reason class. Matching is case-insensitive
/// substring matching against a lowercased copy of `stderr`.
pub fn classify(stderr: &str) -> ReasonClass {
    let lower = stderr.to_ascii_lowercase();
    for (class, substrings) in TABLE {
        if substrings.iter().any(|s| lower.contains(s)) {
            return *class;
        }
    }
    ReasonClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_daemon_not_running() {
        assert_eq!(
            classify("Cannot connect to the Docker daemon at unix:///var/run/docker.sock"),
            ReasonClass::DaemonNotRunning
        );
    }

    #[test]
    fn classifies_permission_denied() {
        assert_eq!(
            classify("Got permission denied while trying to connect"),
            ReasonClass::PermissionDenied
        );
    }

    #[test]
    fn classifies_no_such_object() {
        assert_eq!(
            classify("Error: No such container: myapp-repo-main"),
            ReasonClass::NoSuchObject
        );
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(classify("something unexpected happened"), ReasonClass::Unknown);
    }
}
