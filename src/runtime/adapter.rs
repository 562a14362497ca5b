#![allow(clippy::module_name_repetitions)]
//! Uniform, timeout-bounded wrapper over the external container CLI.
//!
//! Every method here builds an [`crate::exec::ExecRequest`] and hands it to
//! the shared [`crate::exec::ExecService`] primitive; none of them shell out
//! directly. Endpoint handling is explicit: when a caller passes a
//! [`RuntimeEndpoint`], the adapter appends `--context <name>` and pins
//! `DOCKER_HOST` to that endpoint's socket for the duration of the call only,
//! so ambient `DOCKER_HOST`/`DOCKER_CONTEXT` environment can never leak into
//! (or out of) a hardened-endpoint call.

use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::exec::{ExecOutcome, ExecOutput, ExecRequest, ExecService};
use crate::runtime::classify::{classify, ReasonClass};
use crate::runtime::endpoint::RuntimeEndpoint;

/// Operation-class timeout defaults (§5).
pub mod timeouts {
    use std::time::Duration;

    pub const INSPECT: Duration = Duration::from_secs(5);
    pub const DAEMON: Duration = Duration::from_secs(5);
    pub const CREATE: Duration = Duration::from_secs(10);
    pub const START: Duration = Duration::from_secs(30);
    pub const SOCKET_WAIT: Duration = Duration::from_secs(30);
    pub const VM_BOOT: Duration = Duration::from_secs(120);
    /// Sync and archive restore are "unbounded but cancellable" per the
    /// concurrency model; this is the practical cap standing in for that.
    pub const SYNC: Duration = Duration::from_secs(600);
    pub const RESTORE: Duration = Duration::from_secs(600);
}

/// Discriminated outcome of a single external-runtime call.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Classified { class: ReasonClass, stderr: String },
    Timeout,
    Unknown { stderr: String },
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Classified { class, stderr } => Outcome::Classified { class, stderr },
            Outcome::Timeout => Outcome::Timeout,
            Outcome::Unknown { stderr } => Outcome::Unknown { stderr },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    None,
    Created,
    Running,
    Exited,
}

#[derive(Debug, Clone)]
pub struct MountInfo {
    pub source: String,
    pub destination: String,
    pub volume_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerInspect {
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    pub image: String,
    pub mounts: Vec<MountInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct InfoProjection {
    pub default_runtime: String,
    pub rootless: bool,
    pub security_options: Vec<String>,
    pub runtimes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxFeatureState {
    Enabled,
    EmptyListOk,
    DisabledByPolicy,
    DisabledByUserSettings,
    RequirementsNotMet,
}

/// The adapter itself. Cheap to construct; holds only the CLI program name
/// and an [`ExecService`] instance.
#[derive(Debug, Clone)]
pub struct RuntimeAdapter {
    program: OsString,
    exec: ExecService,
}

impl Default for RuntimeAdapter {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl RuntimeAdapter {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            exec: ExecService::new(timeouts::INSPECT),
        }
    }

    fn request(&self, timeout: Duration) -> ExecRequest {
        ExecRequest::new(self.program.clone())
            .inherit_env(true)
            .timeout(timeout)
    }

    /// Apply endpoint scoping to a request: `--context NAME` plus an
    /// explicit `DOCKER_HOST` override that always wins over whatever the
    /// caller's ambient environment contained.
    fn scoped(&self, mut req: ExecRequest, endpoint: Option<&RuntimeEndpoint>) -> ExecRequest {
        if let Some(ep) = endpoint {
            req = req
                .arg("--context")
                .arg(ep.context_name.clone())
                .env("DOCKER_HOST", ep.socket_uri.clone());
        }
        req
    }

    fn call(&self, req: ExecRequest) -> Outcome<ExecOutput> {
        match self.exec.run(req) {
            Ok(ExecOutcome::Timeout { .. }) => Outcome::Timeout,
            Ok(ExecOutcome::Completed(out)) => {
                if out.success() {
                    Outcome::Ok(out)
                } else {
                    let class = classify(&out.stderr);
                    if class == ReasonClass::Unknown {
                        Outcome::Unknown { stderr: out.stderr }
                    } else {
                        Outcome::Classified {
                            class,
                            stderr: out.stderr,
                        }
                    }
                }
            }
            Err(e) => Outcome::Unknown {
                stderr: e.to_string(),
            },
        }
    }

    /// Whether the container CLI binary is on `PATH`.
    pub fn cli_present(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// `{program} version --format {{.Server.Version}}` style liveness probe.
    pub fn daemon_reachable(&self, endpoint: Option<&RuntimeEndpoint>) -> Outcome<()> {
        let req = self.scoped(
            self.request(timeouts::DAEMON)
                .arg("info")
                .arg("--format")
                .arg("{{.ServerVersion}}"),
            endpoint,
        );
        self.call(req).map(|_| ())
    }

    /// Desktop variant version string, when the CLI reports one.
    pub fn desktop_version(&self, endpoint: Option<&RuntimeEndpoint>) -> Outcome<Option<String>> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("info")
                .arg("--format")
                .arg("{{json .}}"),
            endpoint,
        );
        self.call(req).map(|out| {
            serde_json::from_str::<Value>(out.stdout.trim())
                .ok()
                .and_then(|v| {
                    v.get("ServerVersion")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
        })
    }

    /// `info` projection: default runtime, rootless flag, security options,
    /// registered runtimes.
    pub fn info(&self, endpoint: Option<&RuntimeEndpoint>) -> Outcome<InfoProjection> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("info")
                .arg("--format")
                .arg("{{json .}}"),
            endpoint,
        );
        self.call(req).map(|out| parse_info(&out.stdout))
    }

    /// Whether the sandbox subcommand exists at all, distinct from whether
    /// the feature is enabled.
    pub fn sandbox_subcommand_present(&self, endpoint: Option<&RuntimeEndpoint>) -> Outcome<bool> {
        let req = self.scoped(
            self.request(timeouts::INSPECT).arg("sandbox").arg("list"),
            endpoint,
        );
        match self.call(req) {
            Outcome::Ok(_) => Outcome::Ok(true),
            Outcome::Classified {
                class: ReasonClass::NotRecognizedSubcommand,
                ..
            } => Outcome::Ok(false),
            Outcome::Classified { class, stderr } => Outcome::Classified { class, stderr },
            Outcome::Timeout => Outcome::Timeout,
            Outcome::Unknown { stderr } => Outcome::Unknown { stderr },
        }
    }

    /// Sandbox feature state, distinguishing an empty-but-enabled list from
    /// policy/user-settings disablement and from requirements not being met.
    pub fn sandbox_feature_enabled(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
    ) -> Outcome<SandboxFeatureState> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("sandbox")
                .arg("list")
                .arg("--format")
                .arg("{{json .}}"),
            endpoint,
        );
        match self.call(req) {
            Outcome::Ok(out) => {
                let items: Vec<Value> =
                    serde_json::from_str(out.stdout.trim()).unwrap_or_default();
                if items.is_empty() {
                    Outcome::Ok(SandboxFeatureState::EmptyListOk)
                } else {
                    Outcome::Ok(SandboxFeatureState::Enabled)
                }
            }
            Outcome::Classified {
                class: ReasonClass::PolicyDisabled,
                ..
            } => Outcome::Ok(SandboxFeatureState::DisabledByPolicy),
            Outcome::Classified {
                class: ReasonClass::NotRecognizedSubcommand,
                ..
            } => Outcome::Ok(SandboxFeatureState::RequirementsNotMet),
            Outcome::Classified { stderr, .. } if stderr.to_ascii_lowercase().contains("setting") => {
                Outcome::Ok(SandboxFeatureState::DisabledByUserSettings)
            }
            Outcome::Classified { class, stderr } => Outcome::Classified { class, stderr },
            Outcome::Timeout => Outcome::Timeout,
            Outcome::Unknown { stderr } => Outcome::Unknown { stderr },
        }
    }

    pub fn volume_exists(&self, endpoint: Option<&RuntimeEndpoint>, name: &str) -> Outcome<bool> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("volume")
                .arg("inspect")
                .arg(name),
            endpoint,
        );
        match self.call(req) {
            Outcome::Ok(_) => Outcome::Ok(true),
            Outcome::Classified {
                class: ReasonClass::NoSuchObject,
                ..
            } => Outcome::Ok(false),
            Outcome::Classified { class, stderr } => Outcome::Classified { class, stderr },
            Outcome::Timeout => Outcome::Timeout,
            Outcome::Unknown { stderr } => Outcome::Unknown { stderr },
        }
    }

    pub fn volume_create(&self, endpoint: Option<&RuntimeEndpoint>, name: &str) -> Outcome<()> {
        let req = self.scoped(
            self.request(timeouts::CREATE)
                .arg("volume")
                .arg("create")
                .arg(name),
            endpoint,
        );
        self.call(req).map(|_| ())
    }

    pub fn volume_rm(&self, endpoint: Option<&RuntimeEndpoint>, name: &str) -> Outcome<()> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("volume")
                .arg("rm")
                .arg("-f")
                .arg(name),
            endpoint,
        );
        self.call(req).map(|_| ())
    }

    pub fn volume_inspect(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        name: &str,
    ) -> Outcome<VolumeInspect> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("volume")
                .arg("inspect")
                .arg("--format")
                .arg("{{json .}}")
                .arg(name),
            endpoint,
        );
        self.call(req).map(|out| {
            serde_json::from_str::<VolumeInspect>(out.stdout.trim()).unwrap_or(VolumeInspect {
                mountpoint: None,
                name: name.to_string(),
            })
        })
    }

    pub fn context_exists(&self, name: &str) -> Outcome<bool> {
        let req = self
            .request(timeouts::INSPECT)
            .arg("context")
            .arg("inspect")
            .arg(name);
        match self.call(req) {
            Outcome::Ok(_) => Outcome::Ok(true),
            Outcome::Classified {
                class: ReasonClass::ContextMissing | ReasonClass::NoSuchObject,
                ..
            } => Outcome::Ok(false),
            Outcome::Classified { class, stderr } => Outcome::Classified { class, stderr },
            Outcome::Timeout => Outcome::Timeout,
            Outcome::Unknown { stderr } => Outcome::Unknown { stderr },
        }
    }

    pub fn context_create(&self, name: &str, socket_uri: &str) -> Outcome<()> {
        let host_arg = format!("host={socket_uri}");
        let req = self
            .request(timeouts::CREATE)
            .arg("context")
            .arg("create")
            .arg(name)
            .arg("--docker")
            .arg(host_arg);
        self.call(req).map(|_| ())
    }

    pub fn context_inspect(&self, name: &str) -> Outcome<RuntimeEndpoint> {
        let req = self
            .request(timeouts::INSPECT)
            .arg("context")
            .arg("inspect")
            .arg("--format")
            .arg("{{json .}}")
            .arg(name);
        self.call(req).map(|out| {
            let socket = serde_json::from_str::<Value>(out.stdout.trim())
                .ok()
                .and_then(|v| {
                    v.pointer("/Endpoints/docker/Host")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_default();
            RuntimeEndpoint::new(name, socket)
        })
    }

    pub fn container_inspect(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        name: &str,
    ) -> Outcome<Option<ContainerInspect>> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("inspect")
                .arg("--format")
                .arg("{{json .}}")
                .arg(name),
            endpoint,
        );
        match self.call(req) {
            Outcome::Ok(out) => Outcome::Ok(parse_container_inspect(&out.stdout)),
            Outcome::Classified {
                class: ReasonClass::NoSuchObject,
                ..
            } => Outcome::Ok(None),
            Outcome::Classified { class, stderr } => Outcome::Classified { class, stderr },
            Outcome::Timeout => Outcome::Timeout,
            Outcome::Unknown { stderr } => Outcome::Unknown { stderr },
        }
    }

    /// Direct `run` invocation (the `none -> created/running` transition).
    /// `args` is the full argument vector following `run` (flags, image,
    /// command). Attaches to the caller's TTY.
    pub fn run(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        args: Vec<OsString>,
    ) -> Outcome<ExecOutput> {
        let mut req = self
            .request(timeouts::START)
            .arg("run")
            .args(args)
            .inherit_stdio();
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    /// The sandbox-subcommand variant of `run`, for runtimes that gate
    /// container creation behind a dedicated verb.
    pub fn sandbox_run(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        args: Vec<OsString>,
    ) -> Outcome<ExecOutput> {
        let mut req = self
            .request(timeouts::START)
            .arg("sandbox")
            .arg("run")
            .args(args)
            .inherit_stdio();
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    pub fn exec(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        container: &str,
        command: Vec<OsString>,
    ) -> Outcome<ExecOutput> {
        let mut req = self
            .request(timeouts::START)
            .arg("exec")
            .arg("-it")
            .arg(container)
            .args(command)
            .inherit_stdio();
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    /// `start -ai` (attach immediately, no args forwarded to the entrypoint).
    pub fn start_attached(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        container: &str,
    ) -> Outcome<ExecOutput> {
        let mut req = self
            .request(timeouts::START)
            .arg("start")
            .arg("-ai")
            .arg(container)
            .inherit_stdio();
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    /// `start` detached (used when the caller needs to `exec` afterward with
    /// arguments, since the native start path does not forward them).
    pub fn start_detached(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        container: &str,
    ) -> Outcome<ExecOutput> {
        let mut req = self.request(timeouts::START).arg("start").arg(container);
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    pub fn stop(&self, endpoint: Option<&RuntimeEndpoint>, container: &str) -> Outcome<ExecOutput> {
        let mut req = self.request(timeouts::START).arg("stop").arg(container);
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    pub fn rm(&self, endpoint: Option<&RuntimeEndpoint>, container: &str) -> Outcome<ExecOutput> {
        let mut req = self
            .request(timeouts::INSPECT)
            .arg("rm")
            .arg("-f")
            .arg(container);
        req = self.scoped(req, endpoint);
        self.call(req)
    }

    pub fn image_exists(&self, endpoint: Option<&RuntimeEndpoint>, image: &str) -> bool {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("image")
                .arg("inspect")
                .arg(image),
            endpoint,
        );
        matches!(self.call(req), Outcome::Ok(_))
    }

    /// `ps -a` projection used to enumerate containers by label or image
    /// ancestry for `stop --all` and `status --all`.
    pub fn list_containers(&self, endpoint: Option<&RuntimeEndpoint>) -> Outcome<Vec<ContainerSummary>> {
        let req = self.scoped(
            self.request(timeouts::INSPECT)
                .arg("ps")
                .arg("-a")
                .arg("--format")
                .arg("{{json .}}"),
            endpoint,
        );
        self.call(req).map(|out| parse_container_summaries(&out.stdout))
    }

    /// Run an arbitrary helper-container invocation (used by SyncEngine,
    /// EnvImporter, ExportEngine) with an unbounded-but-cancellable timeout.
    pub fn run_helper(
        &self,
        endpoint: Option<&RuntimeEndpoint>,
        args: Vec<OsString>,
        timeout: Duration,
    ) -> Outcome<ExecOutput> {
        let mut req = self.request(timeout).arg("run").args(args);
        req = self.scoped(req, endpoint);
        self.call(req)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeInspect {
    #[serde(rename = "Mountpoint")]
    pub mountpoint: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: String,
}

fn parse_info(raw: &str) -> InfoProjection {
    let v: Value = match serde_json::from_str(raw.trim()) {
        Ok(v) => v,
        Err(_) => return InfoProjection::default(),
    };
    let default_runtime = v
        .get("DefaultRuntime")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let rootless = v
        .get("SecurityOptions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.to_ascii_lowercase().contains("rootless"))
        })
        .unwrap_or(false);
    let security_options = v
        .get("SecurityOptions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let runtimes = v
        .get("Runtimes")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    InfoProjection {
        default_runtime,
        rootless,
        security_options,
        runtimes,
    }
}

fn parse_container_inspect(raw: &str) -> Option<ContainerInspect> {
    let v: Value = serde_json::from_str(raw.trim()).ok()?;
    let v = v.as_array().and_then(|a| a.first()).unwrap_or(&v);
    let running = v.pointer("/State/Running").and_then(Value::as_bool).unwrap_or(false);
    let status = v
        .pointer("/State/Status")
        .and_then(Value::as_str)
        .unwrap_or("");
    let state = if running {
        ContainerState::Running
    } else if status == "created" {
        ContainerState::Created
    } else {
        ContainerState::Exited
    };
    let image = v
        .pointer("/Config/Image")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let labels = v
        .pointer("/Config/Labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, val)| val.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let mounts = v
        .get("Mounts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|m| MountInfo {
                    source: m.get("Source").and_then(Value::as_str).unwrap_or_default().to_string(),
                    destination: m
                        .get("Destination")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    volume_name: m.get("Name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ContainerInspect {
        state,
        labels,
        image,
        mounts,
    })
}

/// `docker ps --format {{json .}}` emits one JSON object per line, not a
/// JSON array; `Labels` arrives as a flat `"k=v,k=v"` string, not an object.
fn parse_container_summaries(raw: &str) -> Vec<ContainerSummary> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let v: Value = serde_json::from_str(line).ok()?;
            let name = v.get("Names").and_then(Value::as_str).unwrap_or_default().to_string();
            let image = v.get("Image").and_then(Value::as_str).unwrap_or_default().to_string();
            let state_str = v.get("State").and_then(Value::as_str).unwrap_or_default();
            let state = match state_str {
                "running" => ContainerState::Running,
                "created" => ContainerState::Created,
                "" => ContainerState::None,
                _ => ContainerState::Exited,
            };
            let labels = v
                .get("Labels")
                .and_then(Value::as_str)
                .map(|s| {
                    s.split(',')
                        .filter_map(|kv| kv.split_once('='))
                        .map(|(k, val)| (k.to_string(), val.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            Some(ContainerSummary {
                name,
                image,
                labels,
                state,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_container_summaries_from_ndjson_lines() {
        let raw = "{\"Names\":\"a\",\"Image\":\"img:1\",\"Labels\":\"containai.sandbox=containai,other=x\",\"State\":\"running\"}\n{\"Names\":\"b\",\"Image\":\"img:2\",\"Labels\":\"\",\"State\":\"exited\"}\n";
        let items = parse_container_summaries(raw);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "a");
        assert_eq!(items[0].state, ContainerState::Running);
        assert_eq!(items[0].labels.get("containai.sandbox").unwrap(), "containai");
        assert_eq!(items[1].state, ContainerState::Exited);
    }

    #[test]
    fn parses_info_projection() {
        let raw = r#"{"DefaultRuntime":"runc","SecurityOptions":["name=seccomp,profile=default","rootless"],"Runtimes":{"runc":{},"sysbox-runc":{}}}"#;
        let info = parse_info(raw);
        assert_eq!(info.default_runtime, "runc");
        assert!(info.rootless);
        assert_eq!(info.runtimes.len(), 2);
    }

    #[test]
    fn parses_container_inspect_running() {
        let raw = r#"[{"State":{"Running":true,"Status":"running"},"Config":{"Image":"img:tag","Labels":{"containai.sandbox":"containai"}},"Mounts":[{"Source":"/vol","Destination":"/data","Name":"myvol"}]}]"#;
        let ci = parse_container_inspect(raw).unwrap();
        assert_eq!(ci.state, ContainerState::Running);
        assert_eq!(ci.image, "img:tag");
        assert_eq!(ci.labels.get("containai.sandbox").unwrap(), "containai");
        assert_eq!(ci.mounts[0].volume_name.as_deref(), Some("myvol"));
    }

    #[test]
    fn cli_present_detects_missing_binary() {
        let adapter = RuntimeAdapter::new("containai-definitely-not-a-real-binary");
        assert!(!adapter.cli_present());
    }
}
