#![allow(clippy::module_name_repetitions)]
//! Host-side control plane for `cai`: isolation provisioning, capability
//! detection, workspace-scoped configuration, container lifecycle, and the
//! config-sync pipeline. Each subsystem is its own module; `main.rs` is the
//! only place that turns a `Result<(), error::ContainAiError>` into a
//! process exit code.

pub mod cli;
pub mod color;
pub mod config;
pub mod doctor;
pub mod env_import;
pub mod error;
pub mod exec;
pub mod export;
pub mod git;
pub mod lifecycle;
pub mod platform;
pub mod provisioner;
pub mod runtime;
pub mod sync;
pub mod util;

/// Version string surfaced by `cai doctor` and the `--version` banner,
/// enriched with build metadata baked in by `build.rs`.
pub fn version_banner() -> String {
    format!(
        "{} ({} {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("CONTAINAI_BUILD_TARGET"),
        env!("CONTAINAI_BUILD_PROFILE"),
        env!("CONTAINAI_BUILD_DATE"),
    )
}
