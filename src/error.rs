#![allow(clippy::module_name_repetitions)]
//! Crate-wide error taxonomy and exit-code mapping.
//!
//! Every subsystem returns `Result<T, ContainAiError>`. `main` converts the
//! top-level result into a process exit code and a single stderr write; it
//! never panics on an expected failure path.

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::classify::ReasonClass;

/// Exit codes per the external-interfaces contract.
pub const EXIT_OK: i32 = 0;
pub const EXIT_GENERAL: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_CONTAINER_START_FAILED: i32 = 11;
pub const EXIT_SESSION_ATTACH_FAILED: i32 = 12;

#[derive(Debug, Error)]
pub enum ContainAiError {
    /// Bad flags, invalid volume name, missing required flag, unknown agent.
    #[error("{0}")]
    Usage(String),

    /// Daemon unreachable, hardened endpoint missing, sandbox feature disabled, WSL1 detected.
    #[error("{message}")]
    Precondition {
        message: String,
        remediation: Option<String>,
    },

    /// Timeouts, rate limits, transient network errors during package fetch; a
    /// classified runtime-adapter failure also lands here when it isn't itself
    /// a precondition.
    #[error("{operation} failed ({class}): {detail}")]
    ClassifiedTransient {
        operation: String,
        class: ReasonClass,
        detail: String,
    },

    /// Container exists but ownership label/image mismatch, or mounted volume
    /// differs from the resolved one.
    #[error("identity conflict: expected {expected}, found {actual}{remediation}", remediation = format_remediation(.remediation))]
    IdentityConflict {
        expected: String,
        actual: String,
        remediation: String,
    },

    /// Helper container failure, invalid sync map entry, restore-archive
    /// validation failure.
    #[error("sync failed: {0}")]
    FatalSync(String),

    /// Starting the container via `run`/`start` failed.
    #[error("container start failed: {0}")]
    ContainerStartFailed(String),

    /// Attaching the interactive session after a successful start failed.
    #[error("session attach failed: {0}")]
    SessionAttachFailed(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_remediation(remediation: &str) -> String {
    if remediation.is_empty() {
        String::new()
    } else {
        format!(" ({remediation})")
    }
}

impl ContainAiError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ContainAiError::Usage(_) => EXIT_USAGE,
            ContainAiError::Precondition { .. } => EXIT_GENERAL,
            ContainAiError::ClassifiedTransient { .. } => EXIT_GENERAL,
            ContainAiError::IdentityConflict { .. } => EXIT_GENERAL,
            ContainAiError::FatalSync(_) => EXIT_GENERAL,
            ContainAiError::ContainerStartFailed(_) => EXIT_CONTAINER_START_FAILED,
            ContainAiError::SessionAttachFailed(_) => EXIT_SESSION_ATTACH_FAILED,
            ContainAiError::Io { .. } => EXIT_GENERAL,
            ContainAiError::Other(_) => EXIT_GENERAL,
        }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        ContainAiError::Usage(msg.into())
    }

    pub fn precondition(message: impl Into<String>, remediation: Option<String>) -> Self {
        ContainAiError::Precondition {
            message: message.into(),
            remediation,
        }
    }

    pub fn identity_conflict(
        expected: impl Into<String>,
        actual: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        ContainAiError::IdentityConflict {
            expected: expected.into(),
            actual: actual.into(),
            remediation: remediation.into(),
        }
    }

    /// Render the full message a caller should print to stderr, including the
    /// structured remediation block for precondition errors.
    pub fn render(&self) -> String {
        match self {
            ContainAiError::Precondition {
                message,
                remediation: Some(r),
            } => format!("{message}\n  why: see above\n  next: {r}"),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for ContainAiError {
    fn from(source: std::io::Error) -> Self {
        ContainAiError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> ContainAiError {
    ContainAiError::Io {
        path: path.into(),
        source,
    }
}

pub type Result<T> = std::result::Result<T, ContainAiError>;
