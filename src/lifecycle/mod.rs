//! Container lifecycle orchestration (§4.8): the `run`/`shell`/`exec`/`stop`/
//! `status` command flows, the `none -> created -> running -> exited` state
//! machine, and the ownership/identity checks that gate every transition.

pub mod naming;

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::agents::{default_image_for, is_containai_image, is_known_agent, KNOWN_AGENTS};
use crate::error::{ContainAiError, Result};
use crate::runtime::{ContainerInspect, ContainerState, ContainerSummary, Outcome, RuntimeAdapter, RuntimeEndpoint};
use crate::util::{shell_join, validate_volume_name};

/// Label carrying ownership of a ContainAI-managed container. `LEGACY_VALUE`
/// is honored for containers created by the predecessor tool this one
/// replaced, so `stop`/`status` keep finding them across the rename.
pub const OWNERSHIP_LABEL_KEY: &str = "containai.sandbox";
pub const OWNERSHIP_VALUE: &str = "containai";
pub const LEGACY_OWNERSHIP_VALUE: &str = "aifo";
/// Canonical in-container mount point for the workspace, bound read-write.
pub const WORKSPACE_MOUNT: &str = "/workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsMode {
    Host,
    Isolated,
}

impl CredentialsMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "host" => Ok(CredentialsMode::Host),
            "isolated" => Ok(CredentialsMode::Isolated),
            other => Err(ContainAiError::usage(format!(
                "invalid --credentials mode '{other}', expected 'host' or 'isolated'"
            ))),
        }
    }
}

impl Default for CredentialsMode {
    fn default() -> Self {
        CredentialsMode::Isolated
    }
}

/// Full surface of the `run`/`shell` CLI invocation (§6), already parsed and
/// type-checked by the `cli` layer before it reaches [`Lifecycle`].
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub name: Option<String>,
    pub workspace: PathBuf,
    pub data_volume: Option<String>,
    pub agent: String,
    pub image_tag: Option<String>,
    pub credentials: CredentialsMode,
    pub acknowledge_credential_risk: bool,
    /// Stop and remove an existing container of this identity, then proceed
    /// through `none` as if it never existed. Volume is kept.
    pub restart: bool,
    /// Same effect as `restart`; kept as a distinct flag because callers
    /// reach for it when they mean "start over", not "I know it's there".
    pub fresh: bool,
    /// `restart` plus recreate the data volume from empty.
    pub reset: bool,
    /// Downgrades the volume-identity mismatch from hard-fail to a logged
    /// warning; never affects the image-identity check.
    pub force: bool,
    pub detached: bool,
    pub shell: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub debug: bool,
    pub mount_docker_socket: bool,
    pub please_root_my_host: bool,
    pub env_vars: Vec<(String, String)>,
    pub volume_specs: Vec<String>,
    pub agent_args: Vec<String>,
}

impl RunRequest {
    fn wants_teardown(&self) -> bool {
        self.restart || self.fresh || self.reset
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub state: &'static str,
    pub image: Option<String>,
    pub owned: bool,
}

fn state_label(state: ContainerState) -> &'static str {
    match state {
        ContainerState::None => "none",
        ContainerState::Created => "created",
        ContainerState::Running => "running",
        ContainerState::Exited => "exited",
    }
}

/// True when `labels`/`image` carry ContainAI ownership: the current
/// ownership label value, the legacy value kept for migration, or (when
/// neither label is present, e.g. a container created by a very old
/// version) an image under the ContainAI image repository prefix.
pub fn owned_by_containai(labels: &HashMap<String, String>, image: &str) -> bool {
    match labels.get(OWNERSHIP_LABEL_KEY).map(String::as_str) {
        Some(OWNERSHIP_VALUE) | Some(LEGACY_OWNERSHIP_VALUE) => true,
        Some(_) => false,
        None => is_containai_image(image),
    }
}

/// Validate the safety-gated flag combinations before anything touches the
/// runtime: unknown agent, host credentials without acknowledgement, and a
/// docker-socket mount without the matching escape hatch all hard-fail here.
pub fn validate_safety_gates(req: &RunRequest) -> Result<()> {
    if !is_known_agent(&req.agent) {
        return Err(ContainAiError::usage(format!(
            "unknown agent '{}', expected one of: {}",
            req.agent,
            KNOWN_AGENTS.join(", ")
        )));
    }
    if req.credentials == CredentialsMode::Host && !req.acknowledge_credential_risk {
        return Err(ContainAiError::precondition(
            "--credentials=host exposes host credential material to the agent container",
            Some("pass --acknowledge-credential-risk to proceed".to_string()),
        ));
    }
    if req.mount_docker_socket && !req.please_root_my_host {
        return Err(ContainAiError::precondition(
            "mounting the docker socket grants the container root-equivalent control of the host",
            Some("pass --please-root-my-host to proceed".to_string()),
        ));
    }
    if let Some(vol) = &req.data_volume {
        validate_volume_name(vol).map_err(ContainAiError::usage)?;
    }
    Ok(())
}

pub struct Lifecycle<'a> {
    adapter: &'a RuntimeAdapter,
    endpoint: Option<&'a RuntimeEndpoint>,
}

impl<'a> Lifecycle<'a> {
    pub fn new(adapter: &'a RuntimeAdapter, endpoint: Option<&'a RuntimeEndpoint>) -> Self {
        Self { adapter, endpoint }
    }

    pub fn resolve_name(&self, req: &RunRequest) -> String {
        req.name
            .clone()
            .unwrap_or_else(|| naming::derive_container_name(&req.workspace))
    }

    fn resolve_data_volume(&self, name: &str, req: &RunRequest) -> String {
        req.data_volume.clone().unwrap_or_else(|| format!("{name}-data"))
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerInspect>> {
        match self.adapter.container_inspect(self.endpoint, name) {
            Outcome::Ok(ci) => Ok(ci),
            other => Err(classified_to_error("inspect", other)),
        }
    }

    fn assert_ownership(&self, name: &str, ci: &ContainerInspect) -> Result<()> {
        if owned_by_containai(&ci.labels, &ci.image) {
            Ok(())
        } else {
            Err(ContainAiError::identity_conflict(
                "a ContainAI-owned container",
                format!("foreign container '{name}' (image {})", ci.image),
                format!("remove or rename '{name}' before retrying, or pass --name"),
            ))
        }
    }

    fn assert_image_identity(&self, name: &str, ci: &ContainerInspect, expected_image: &str) -> Result<()> {
        if ci.image == expected_image {
            Ok(())
        } else {
            Err(ContainAiError::identity_conflict(
                expected_image,
                ci.image.clone(),
                format!("image changed since '{name}' was created; pass --restart to recreate it"),
            ))
        }
    }

    fn assert_volume_identity(&self, name: &str, ci: &ContainerInspect, expected_volume: &str, force: bool) -> Result<()> {
        let mounted = ci
            .mounts
            .iter()
            .any(|m| m.volume_name.as_deref() == Some(expected_volume));
        if mounted {
            return Ok(());
        }
        let found: Vec<&str> = ci.mounts.iter().filter_map(|m| m.volume_name.as_deref()).collect();
        let msg = format!(
            "'{name}' is not mounting the expected data volume '{expected_volume}' (found: {})",
            if found.is_empty() { "none".to_string() } else { found.join(", ") }
        );
        if force {
            crate::color::log_warn(&format!("{msg}; continuing because --force was passed"));
            Ok(())
        } else {
            Err(ContainAiError::identity_conflict(
                expected_volume,
                found.join(", "),
                "pass --force to proceed anyway, or --restart to recreate the container",
            ))
        }
    }

    fn teardown(&self, name: &str) -> Result<()> {
        match self.adapter.stop(self.endpoint, name) {
            Outcome::Ok(_) | Outcome::Classified { .. } => {}
            other => return Err(classified_to_error("stop", other)),
        }
        match self.adapter.rm(self.endpoint, name) {
            Outcome::Ok(_) | Outcome::Classified { .. } => Ok(()),
            other => Err(classified_to_error("rm", other)),
        }
    }

    /// Entry point for `run`/`shell`, implementing the full state machine.
    pub fn run(&self, req: &RunRequest) -> Result<()> {
        validate_safety_gates(req)?;
        let name = self.resolve_name(req);
        let data_volume = self.resolve_data_volume(&name, req);
        let image = default_image_for(&req.agent, req.image_tag.as_deref());

        let mut ci = self.inspect(&name)?;

        if req.wants_teardown() {
            if let Some(existing) = &ci {
                self.assert_ownership(&name, existing)?;
                self.teardown(&name)?;
                ci = None;
            }
            if req.reset {
                match self.adapter.volume_exists(self.endpoint, &data_volume) {
                    Outcome::Ok(true) => {
                        crate::color::log_info(&format!("recreating data volume '{data_volume}'"));
                        match self.adapter.volume_rm(self.endpoint, &data_volume) {
                            Outcome::Ok(()) => {}
                            other => return Err(classified_to_error("volume remove", other)),
                        }
                    }
                    Outcome::Ok(false) => {}
                    other => return Err(classified_to_error("volume inspect", other)),
                }
            }
        }

        self.preflight()?;

        match ci {
            Some(existing) if existing.state == ContainerState::Running => {
                self.assert_ownership(&name, &existing)?;
                self.assert_image_identity(&name, &existing, &image)?;
                self.assert_volume_identity(&name, &existing, &data_volume, req.force)?;
                self.exec_into(&name, req)
            }
            Some(existing) => {
                self.assert_ownership(&name, &existing)?;
                self.assert_image_identity(&name, &existing, &image)?;
                self.assert_volume_identity(&name, &existing, &data_volume, req.force)?;
                self.start_existing(&name, req)
            }
            None => self.create_and_run(&name, &data_volume, &image, req),
        }
    }

    fn preflight(&self) -> Result<()> {
        use crate::runtime::SandboxFeatureState;
        match self.adapter.sandbox_feature_enabled(self.endpoint) {
            Outcome::Ok(SandboxFeatureState::Enabled) | Outcome::Ok(SandboxFeatureState::EmptyListOk) => {}
            Outcome::Ok(SandboxFeatureState::RequirementsNotMet) => {}
            Outcome::Ok(state) => {
                return Err(ContainAiError::precondition(
                    format!("sandbox feature is not available ({state:?})"),
                    Some("run `cai doctor` for remediation steps".to_string()),
                ));
            }
            other => return Err(classified_to_error("sandbox feature check", other)),
        }
        if std::env::var("REQUIRE_ISOLATION").as_deref() == Ok("1") {
            // Hard requirement: the caller has opted into failing closed
            // when the hardened runtime cannot be confirmed.
            match self.adapter.info(self.endpoint) {
                Outcome::Ok(info) if info.runtimes.iter().any(|r| r == crate::provisioner::HARDENED_RUNTIME_NAME) => {}
                Outcome::Ok(_) => {
                    return Err(ContainAiError::precondition(
                        "REQUIRE_ISOLATION=1 is set but the hardened runtime is not registered",
                        Some("run `cai setup` to provision it".to_string()),
                    ));
                }
                other => return Err(classified_to_error("runtime info", other)),
            }
        }
        Ok(())
    }

    fn exec_into(&self, name: &str, req: &RunRequest) -> Result<()> {
        let command = agent_command(req);
        match self.adapter.exec(self.endpoint, name, command) {
            Outcome::Ok(out) if out.status.success() => Ok(()),
            Outcome::Ok(out) => Err(ContainAiError::SessionAttachFailed(format!(
                "agent process exited with {}",
                out.status
            ))),
            other => Err(ContainAiError::SessionAttachFailed(outcome_detail("exec", other))),
        }
    }

    fn start_existing(&self, name: &str, req: &RunRequest) -> Result<()> {
        if req.agent_args.is_empty() {
            match self.adapter.start_attached(self.endpoint, name) {
                Outcome::Ok(out) if out.status.success() => Ok(()),
                Outcome::Ok(out) => Err(ContainAiError::ContainerStartFailed(format!(
                    "start exited with {}",
                    out.status
                ))),
                other => Err(ContainAiError::ContainerStartFailed(outcome_detail("start", other))),
            }
        } else {
            match self.adapter.start_detached(self.endpoint, name) {
                Outcome::Ok(_) => self.exec_into(name, req),
                other => Err(ContainAiError::ContainerStartFailed(outcome_detail("start", other))),
            }
        }
    }

    fn create_and_run(&self, name: &str, data_volume: &str, image: &str, req: &RunRequest) -> Result<()> {
        match self.adapter.volume_exists(self.endpoint, data_volume) {
            Outcome::Ok(true) => {}
            Outcome::Ok(false) => match self.adapter.volume_create(self.endpoint, data_volume) {
                Outcome::Ok(_) => {}
                other => return Err(classified_to_error("volume create", other)),
            },
            other => return Err(classified_to_error("volume inspect", other)),
        }
        if !self.adapter.image_exists(self.endpoint, image) {
            return Err(ContainAiError::precondition(
                format!("image '{image}' is not present locally"),
                Some("pull it, or run `cai setup` if provisioning is incomplete".to_string()),
            ));
        }
        let args = build_run_args(name, data_volume, image, req);
        match self.adapter.run(self.endpoint, args) {
            Outcome::Ok(out) if out.status.success() => Ok(()),
            Outcome::Ok(out) => Err(ContainAiError::ContainerStartFailed(format!(
                "run exited with {}",
                out.status
            ))),
            other => Err(ContainAiError::ContainerStartFailed(outcome_detail("run", other))),
        }
    }

    /// `stop`: enumerate containers by ownership label (preferred) and by
    /// ContainAI image ancestry (migration fallback), stopping and removing
    /// each. `target` restricts to a single resolved name; `None` means
    /// `--all`.
    pub fn stop(&self, target: Option<&str>) -> Result<Vec<String>> {
        let summaries = match self.adapter.list_containers(self.endpoint) {
            Outcome::Ok(items) => items,
            other => return Err(classified_to_error("list containers", other)),
        };
        let mut stopped = Vec::new();
        for c in summaries.iter().filter(|c| owned_by_containai(&c.labels, &c.image)) {
            if let Some(t) = target {
                if c.name != t {
                    continue;
                }
            }
            self.teardown(&c.name)?;
            stopped.push(c.name.clone());
        }
        if target.is_some() && stopped.is_empty() {
            return Err(ContainAiError::usage(format!(
                "no ContainAI-owned container named '{}'",
                target.unwrap()
            )));
        }
        Ok(stopped)
    }

    /// `status`: a single resolved container, or every ContainAI-owned one
    /// when `target` is `None`.
    pub fn status(&self, target: Option<&str>) -> Result<Vec<StatusReport>> {
        match target {
            Some(name) => {
                let ci = self.inspect(name)?;
                Ok(vec![match ci {
                    Some(ci) => StatusReport {
                        name: name.to_string(),
                        state: state_label(ci.state),
                        image: Some(ci.image.clone()),
                        owned: owned_by_containai(&ci.labels, &ci.image),
                    },
                    None => StatusReport {
                        name: name.to_string(),
                        state: state_label(ContainerState::None),
                        image: None,
                        owned: false,
                    },
                }])
            }
            None => {
                let summaries = match self.adapter.list_containers(self.endpoint) {
                    Outcome::Ok(items) => items,
                    other => return Err(classified_to_error("list containers", other)),
                };
                Ok(summaries
                    .into_iter()
                    .filter(|c| owned_by_containai(&c.labels, &c.image))
                    .map(|c| StatusReport {
                        name: c.name,
                        state: state_label(c.state),
                        image: Some(c.image),
                        owned: true,
                    })
                    .collect())
            }
        }
    }

    /// `exec`: run `command` inside an already-running container instead of
    /// the agent entrypoint. Unlike `run`, never creates or starts anything.
    pub fn exec_command(&self, name: &str, command: Vec<OsString>) -> Result<()> {
        let ci = self.inspect(name)?.ok_or_else(|| {
            ContainAiError::precondition(format!("no container named '{name}'"), Some("run `cai run` first".to_string()))
        })?;
        self.assert_ownership(name, &ci)?;
        if ci.state != ContainerState::Running {
            return Err(ContainAiError::precondition(
                format!("'{name}' is not running ({})", state_label(ci.state)),
                Some("run `cai run` to start it".to_string()),
            ));
        }
        match self.adapter.exec(self.endpoint, name, command) {
            Outcome::Ok(out) if out.status.success() => Ok(()),
            Outcome::Ok(out) => Err(ContainAiError::SessionAttachFailed(format!("command exited with {}", out.status))),
            other => Err(ContainAiError::SessionAttachFailed(outcome_detail("exec", other))),
        }
    }
}

fn agent_command(req: &RunRequest) -> Vec<OsString> {
    if req.agent_args.is_empty() {
        vec![OsString::from(req.agent.clone())]
    } else {
        req.agent_args.iter().map(OsString::from).collect()
    }
}

fn build_run_args(name: &str, data_volume: &str, image: &str, req: &RunRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    args.push("--name".into());
    args.push(name.into());
    args.push("-d".into());
    args.push("--label".into());
    args.push(format!("{OWNERSHIP_LABEL_KEY}={OWNERSHIP_VALUE}").into());
    args.push("-v".into());
    args.push(format!("{data_volume}:/home/agent").into());
    args.push("-v".into());
    args.push(format!("{}:{WORKSPACE_MOUNT}", req.workspace.display()).into());
    for spec in &req.volume_specs {
        args.push("-v".into());
        args.push(spec.into());
    }
    if req.mount_docker_socket {
        args.push("-v".into());
        args.push("/var/run/docker.sock:/var/run/docker.sock".into());
    }
    for (k, v) in &req.env_vars {
        args.push("-e".into());
        args.push(format!("{k}={v}").into());
    }
    if req.credentials == CredentialsMode::Host {
        args.push("-e".into());
        args.push("CONTAINAI_CREDENTIALS_MODE=host".into());
    }
    args.push(image.into());
    if !req.shell && !req.agent_args.is_empty() {
        args.extend(req.agent_args.iter().map(OsString::from));
    } else if !req.shell {
        args.push(req.agent.clone().into());
    }
    args
}

fn outcome_detail<T>(operation: &str, outcome: Outcome<T>) -> String {
    match outcome {
        Outcome::Ok(_) => format!("{operation}: unexpectedly ok"),
        Outcome::Classified { class, stderr } => format!("{operation} failed ({class}): {}", first_line(&stderr)),
        Outcome::Timeout => format!("{operation} timed out"),
        Outcome::Unknown { stderr } => format!("{operation} failed: {}", first_line(&stderr)),
    }
}

fn classified_to_error<T>(operation: &str, outcome: Outcome<T>) -> ContainAiError {
    match outcome {
        Outcome::Ok(_) => unreachable!("classified_to_error called on Ok outcome"),
        Outcome::Classified { class, stderr } => ContainAiError::ClassifiedTransient {
            operation: operation.to_string(),
            class,
            detail: first_line(&stderr),
        },
        Outcome::Timeout => ContainAiError::precondition(format!("{operation} timed out"), None),
        Outcome::Unknown { stderr } => ContainAiError::precondition(
            format!("{operation} failed: {}", first_line(&stderr)),
            None,
        ),
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").to_string()
}

#[allow(dead_code)]
fn describe_run_args(args: &[OsString]) -> String {
    shell_join(&args.iter().map(|a| a.to_string_lossy().to_string()).collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn owned_by_label_current_value() {
        let l = labels(&[(OWNERSHIP_LABEL_KEY, OWNERSHIP_VALUE)]);
        assert!(owned_by_containai(&l, "anything:latest"));
    }

    #[test]
    fn owned_by_label_legacy_value() {
        let l = labels(&[(OWNERSHIP_LABEL_KEY, LEGACY_OWNERSHIP_VALUE)]);
        assert!(owned_by_containai(&l, "anything:latest"));
    }

    #[test]
    fn foreign_label_value_rejected_even_with_containai_image() {
        let l = labels(&[(OWNERSHIP_LABEL_KEY, "someone-else")]);
        assert!(!owned_by_containai(&l, "ghcr.io/containai/claude:latest"));
    }

    #[test]
    fn falls_back_to_image_prefix_when_label_absent() {
        let l = HashMap::new();
        assert!(owned_by_containai(&l, "ghcr.io/containai/claude:latest"));
        assert!(!owned_by_containai(&l, "alpine:latest"));
    }

    #[test]
    fn credentials_mode_parses_known_values() {
        assert_eq!(CredentialsMode::parse("host").unwrap(), CredentialsMode::Host);
        assert_eq!(CredentialsMode::parse("isolated").unwrap(), CredentialsMode::Isolated);
        assert!(CredentialsMode::parse("bogus").is_err());
    }

    fn base_req() -> RunRequest {
        RunRequest {
            name: None,
            workspace: PathBuf::from("/tmp/ws"),
            data_volume: None,
            agent: "claude".to_string(),
            image_tag: None,
            credentials: CredentialsMode::Isolated,
            acknowledge_credential_risk: false,
            restart: false,
            fresh: false,
            reset: false,
            force: false,
            detached: false,
            shell: false,
            quiet: false,
            verbose: false,
            debug: false,
            mount_docker_socket: false,
            please_root_my_host: false,
            env_vars: Vec::new(),
            volume_specs: Vec::new(),
            agent_args: Vec::new(),
        }
    }

    #[test]
    fn rejects_unknown_agent() {
        let mut req = base_req();
        req.agent = "not-a-real-agent".to_string();
        assert!(validate_safety_gates(&req).is_err());
    }

    #[test]
    fn rejects_host_credentials_without_acknowledgement() {
        let mut req = base_req();
        req.credentials = CredentialsMode::Host;
        assert!(validate_safety_gates(&req).is_err());
        req.acknowledge_credential_risk = true;
        assert!(validate_safety_gates(&req).is_ok());
    }

    #[test]
    fn rejects_docker_socket_mount_without_escape_hatch() {
        let mut req = base_req();
        req.mount_docker_socket = true;
        assert!(validate_safety_gates(&req).is_err());
        req.please_root_my_host = true;
        assert!(validate_safety_gates(&req).is_ok());
    }

    #[test]
    fn rejects_invalid_data_volume_name() {
        let mut req = base_req();
        req.data_volume = Some("../escape".to_string());
        assert!(validate_safety_gates(&req).is_err());
    }

    #[test]
    fn build_run_args_includes_ownership_label_and_data_mount() {
        let req = base_req();
        let args = build_run_args("my-container", "my-container-data", "ghcr.io/containai/claude:latest", &req);
        let rendered: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert!(rendered.contains(&format!("{OWNERSHIP_LABEL_KEY}={OWNERSHIP_VALUE}")));
        assert!(rendered.contains(&"my-container-data:/home/agent".to_string()));
        assert!(rendered.contains(&format!("/tmp/ws:{WORKSPACE_MOUNT}")));
    }

    #[test]
    fn build_run_args_adds_docker_socket_mount_when_requested() {
        let mut req = base_req();
        req.mount_docker_socket = true;
        let args = build_run_args("n", "v", "img", &req);
        let rendered: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert!(rendered.iter().any(|a| a == "/var/run/docker.sock:/var/run/docker.sock"));
    }
}
