#![allow(clippy::module_name_repetitions)]
//! The `cai` command-line surface (§6) and the dispatch from a parsed
//! [`Cli`] into the subsystem call each subcommand makes. `main.rs` only
//! parses, calls [`dispatch`], and turns the result into an exit code.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::color;
use crate::config::ConfigStore;
use crate::doctor;
use crate::env_import::{self, EnvImporter};
use crate::error::{ContainAiError, Result};
use crate::export::{ExportEngine, ExportOptions};
use crate::lifecycle::{self, CredentialsMode, Lifecycle, RunRequest};
use crate::platform::PlatformProbe;
use crate::provisioner::{Provisioner, SetupOptions};
use crate::runtime::{RuntimeAdapter, RuntimeEndpoint};
use crate::sync::{self, SyncEngine, SyncOptions};

#[derive(Parser, Debug)]
#[command(name = "cai", version = crate::version_banner(), about = "Run AI coding agents inside hardened Linux containers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe the runtime landscape and report isolation readiness
    Doctor {
        /// Emit the machine-readable report on stdout instead of text on stderr
        #[arg(long)]
        json: bool,
        /// Print the hardened-runtime templates this host would get from `setup`, without installing anything
        #[arg(long = "build-templates")]
        build_templates: bool,
    },

    /// Idempotently install and wire the hardened runtime
    Setup {
        #[arg(long)]
        force: bool,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long)]
        verbose: bool,
    },

    /// Re-run the hardened-runtime post-install validation
    Validate {
        #[arg(long)]
        verbose: bool,
    },

    /// Sync selected host configuration into a workspace's data volume
    Import {
        /// Workspace directory; defaults to the current directory
        workspace: Option<PathBuf>,
        /// Resolve the target data volume from this container's mounts instead of the workspace
        #[arg(long = "container")]
        container: Option<String>,
        /// Target data volume name, bypassing workspace/container resolution
        #[arg(long = "data-volume")]
        data_volume: Option<String>,
        /// Restore from a previously exported `.tgz` instead of syncing from the host
        #[arg(long = "from")]
        from: Option<PathBuf>,
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long = "no-excludes")]
        no_excludes: bool,
        #[arg(long = "no-secrets")]
        no_secrets: bool,
        #[arg(long)]
        verbose: bool,
    },

    /// Stream a workspace's data volume to a local `.tgz`
    Export {
        /// Destination path; a directory or omitted path gets a timestamped name
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(long = "container")]
        container: Option<String>,
        #[arg(long = "data-volume")]
        data_volume: Option<String>,
        #[arg(long = "workspace")]
        workspace: Option<PathBuf>,
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "no-excludes")]
        no_excludes: bool,
    },

    /// Create or attach to the workspace's container and run the agent
    Run(RunArgs),

    /// Shorthand for an interactive shell in the workspace's container
    Shell(ShellArgs),

    /// Run a command inside an already-running container instead of the agent
    Exec {
        #[arg(long = "name")]
        name: Option<String>,
        #[arg(long = "workspace")]
        workspace: Option<PathBuf>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Stop (and remove) ContainAI-owned containers
    Stop {
        /// Container name; defaults to the one derived from the current workspace
        name: Option<String>,
        /// Stop every ContainAI-owned container instead of a single one
        #[arg(long)]
        all: bool,
        #[arg(long)]
        remove: bool,
        /// Skip the interactive confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Report container state
    Status {
        #[arg(long)]
        json: bool,
        /// Container name; every ContainAI-owned container when omitted
        name: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Workspace directory; defaults to the current directory
    pub path: Option<PathBuf>,
    #[arg(long = "name")]
    pub name: Option<String>,
    #[arg(long = "data-volume")]
    pub data_volume: Option<String>,
    #[arg(long = "agent")]
    pub agent: Option<String>,
    #[arg(long = "image-tag")]
    pub image_tag: Option<String>,
    #[arg(long = "credentials", default_value = "isolated")]
    pub credentials: String,
    #[arg(long = "acknowledge-credential-risk")]
    pub acknowledge_credential_risk: bool,
    /// Stop and remove an existing container of this identity before proceeding; the volume is kept
    #[arg(long)]
    pub restart: bool,
    #[arg(long)]
    pub fresh: bool,
    /// Same as `--restart`, plus recreate the data volume from empty
    #[arg(long)]
    pub reset: bool,
    /// Downgrade a volume-identity mismatch from hard-fail to a warning
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub detached: bool,
    /// Start a shell instead of the agent entrypoint
    #[arg(long)]
    pub shell: bool,
    #[arg(short = 'q', long)]
    pub quiet: bool,
    #[arg(long)]
    pub verbose: bool,
    #[arg(long)]
    pub debug: bool,
    #[arg(long = "mount-docker-socket")]
    pub mount_docker_socket: bool,
    #[arg(long = "please-root-my-host")]
    pub please_root_my_host: bool,
    /// Pass an environment variable into the container, `NAME=value`
    #[arg(short = 'e', value_parser = parse_env_kv)]
    pub env: Vec<(String, String)>,
    /// Extra bind mount, in `docker -v` syntax
    #[arg(short = 'v')]
    pub volume: Vec<String>,
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Arguments passed through to the agent entrypoint
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub agent_args: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ShellArgs {
    pub path: Option<PathBuf>,
    #[arg(long = "name")]
    pub name: Option<String>,
    #[arg(long = "data-volume")]
    pub data_volume: Option<String>,
    #[arg(long = "agent")]
    pub agent: Option<String>,
    #[arg(long)]
    pub restart: bool,
    #[arg(long)]
    pub force: bool,
    #[arg(short = 'q', long)]
    pub quiet: bool,
    #[arg(long)]
    pub verbose: bool,
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

fn parse_env_kv(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected NAME=value, got '{raw}'"))
}

/// Canonicalize `path` (or the current directory when absent) into the
/// absolute form every workspace-scoped subsystem expects.
fn resolve_workspace(path: Option<PathBuf>) -> Result<PathBuf> {
    let raw = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    std::fs::canonicalize(&raw).map_err(|e| ContainAiError::usage(format!("workspace {}: {e}", raw.display())))
}

fn load_config_store(config: Option<&Path>, workspace: &Path) -> Result<ConfigStore> {
    match config {
        Some(path) => ConfigStore::load_explicit(path),
        None => Ok(ConfigStore::discover(workspace)),
    }
}

/// Use the hardened endpoint when it has actually been provisioned;
/// otherwise fall back to the default endpoint rather than hard-failing
/// every command on an unprovisioned host.
fn resolve_endpoint(adapter: &RuntimeAdapter) -> Option<RuntimeEndpoint> {
    let name = RuntimeEndpoint::hardened_name();
    match adapter.context_exists(&name) {
        crate::runtime::Outcome::Ok(true) => match adapter.context_inspect(&name) {
            crate::runtime::Outcome::Ok(endpoint) => Some(endpoint),
            _ => None,
        },
        _ => None,
    }
}

/// `--data-volume` wins outright; `--container` resolves the volume mounted
/// at `/home/agent` on that container; otherwise fall back to the
/// workspace-resolved configuration.
fn resolve_volume_name(
    adapter: &RuntimeAdapter,
    endpoint: Option<&RuntimeEndpoint>,
    data_volume: Option<String>,
    container: Option<String>,
    effective: &crate::config::EffectiveConfig,
) -> Result<String> {
    if let Some(v) = data_volume {
        return Ok(v);
    }
    if let Some(name) = container {
        let ci = match adapter.container_inspect(endpoint, &name) {
            crate::runtime::Outcome::Ok(Some(ci)) => ci,
            crate::runtime::Outcome::Ok(None) => {
                return Err(ContainAiError::usage(format!("no container named '{name}'")));
            }
            other => {
                return Err(ContainAiError::precondition(
                    format!("could not inspect container '{name}': {other:?}"),
                    None,
                ));
            }
        };
        return ci
            .mounts
            .iter()
            .find(|m| m.destination == "/home/agent")
            .and_then(|m| m.volume_name.clone())
            .ok_or_else(|| ContainAiError::precondition(format!("'{name}' has no data volume mounted at /home/agent"), None));
    }
    Ok(effective.data_volume.clone())
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Doctor { json, build_templates } => cmd_doctor(json, build_templates),
        Command::Setup { force, dry_run, verbose } => cmd_setup(force, dry_run, verbose),
        Command::Validate { verbose } => cmd_validate(verbose),
        Command::Import {
            workspace,
            container,
            data_volume,
            from,
            config,
            dry_run,
            no_excludes,
            no_secrets,
            verbose,
        } => cmd_import(
            workspace,
            container,
            data_volume,
            from,
            config,
            dry_run,
            no_excludes,
            no_secrets,
            verbose,
        ),
        Command::Export {
            output,
            container,
            data_volume,
            workspace,
            config,
            no_excludes,
        } => cmd_export(output, container, data_volume, workspace, config, no_excludes),
        Command::Run(args) => cmd_run(args),
        Command::Shell(args) => cmd_shell(args),
        Command::Exec { name, workspace, command } => cmd_exec(name, workspace, command),
        Command::Stop { name, all, remove, force } => cmd_stop(name, all, remove, force),
        Command::Status { json, name } => cmd_status(json, name),
    }
}

fn cmd_doctor(json: bool, build_templates: bool) -> Result<()> {
    let platform = PlatformProbe::detect();
    if build_templates {
        for (name, contents) in doctor::build_templates(&platform) {
            println!("# {name}\n{contents}");
        }
        return Ok(());
    }
    let adapter = RuntimeAdapter::default();
    let report = doctor::run(&adapter, &platform);
    if json {
        let rendered = report
            .to_json_string()
            .map_err(|e| ContainAiError::precondition(format!("failed to render doctor report: {e}"), None))?;
        println!("{rendered}");
    } else {
        report.print_text();
    }
    if report.gate_ok() {
        Ok(())
    } else {
        Err(ContainAiError::precondition(
            "no isolation path is ready on this host",
            Some("run `cai setup`".to_string()),
        ))
    }
}

fn cmd_setup(force: bool, dry_run: bool, verbose: bool) -> Result<()> {
    let adapter = RuntimeAdapter::default();
    let platform = PlatformProbe::detect();
    Provisioner::new(&adapter, &platform).setup(&SetupOptions { force, dry_run, verbose })
}

fn cmd_validate(verbose: bool) -> Result<()> {
    let adapter = RuntimeAdapter::default();
    let platform = PlatformProbe::detect();
    Provisioner::new(&adapter, &platform).validate(verbose)
}

#[allow(clippy::too_many_arguments)]
fn cmd_import(
    workspace: Option<PathBuf>,
    container: Option<String>,
    data_volume: Option<String>,
    from: Option<PathBuf>,
    config: Option<PathBuf>,
    dry_run: bool,
    no_excludes: bool,
    no_secrets: bool,
    verbose: bool,
) -> Result<()> {
    let ws = resolve_workspace(workspace)?;
    let store = load_config_store(config.as_deref(), &ws)?;
    let effective = store.effective(&ws);
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let volume_name = resolve_volume_name(&adapter, endpoint.as_ref(), data_volume, container, &effective)?;

    let opts = SyncOptions {
        dry_run,
        no_excludes,
        no_secrets,
        verbose,
    };
    let engine = SyncEngine::new(&adapter, endpoint.clone());

    if let Some(archive) = from {
        engine.restore(&archive, &volume_name)?;
        color::log_ok(&format!("restored {} into {volume_name}", archive.display()));
        return Ok(());
    }

    let home = home::home_dir()
        .ok_or_else(|| ContainAiError::precondition("cannot determine home directory", None))?;
    let report = engine.sync(&home, &volume_name, sync::map::DEFAULT_SYNC_MAP, &effective.excludes, &opts)?;
    color::log_info(&format!(
        "synced {} entries into '{volume_name}'",
        report.entries_planned
    ));

    let host_plugin_root = home.join(".claude").join("plugins");
    let warnings = engine.run_post_sync_transforms(
        &volume_name,
        Some(&home.join(".config/containai/plugins.json")).filter(|p| p.is_file()),
        Some(&home.join(".config/containai/marketplaces.json")).filter(|p| p.is_file()),
        Some(&home.join(".config/containai/settings.json")).filter(|p| p.is_file()),
        &host_plugin_root.display().to_string(),
        "/home/agent/.claude/plugins",
        &opts,
    )?;
    for w in warnings {
        color::log_warn(&w);
    }

    let importer = EnvImporter::new(&adapter, endpoint);
    let spec = env_import::EnvSpec {
        import: effective.env.import.clone(),
        from_host: effective.env.from_host,
        env_file: effective.env.env_file.as_ref().map(|p| p.display().to_string()),
    };
    let merged = importer.merge(&ws, &spec)?;
    importer.write_into_volume(&volume_name, &merged, &env_import::ImportOptions { dry_run })?;
    if !merged.is_empty() {
        color::log_info(&format!("imported env vars: {}", merged.names().join(", ")));
    }

    Ok(())
}

fn cmd_export(
    output: Option<PathBuf>,
    container: Option<String>,
    data_volume: Option<String>,
    workspace: Option<PathBuf>,
    config: Option<PathBuf>,
    no_excludes: bool,
) -> Result<()> {
    let ws = resolve_workspace(workspace)?;
    let store = load_config_store(config.as_deref(), &ws)?;
    let effective = store.effective(&ws);
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let volume_name = resolve_volume_name(&adapter, endpoint.as_ref(), data_volume, container, &effective)?;

    let engine = ExportEngine::new(&adapter, endpoint);
    let path = engine.export(&volume_name, output.as_deref(), &effective.excludes, &ExportOptions { no_excludes })?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let ws = resolve_workspace(args.path)?;
    let store = load_config_store(args.config.as_deref(), &ws)?;
    let effective = store.effective(&ws);
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let lifecycle = Lifecycle::new(&adapter, endpoint.as_ref());

    let req = RunRequest {
        name: args.name,
        workspace: ws,
        data_volume: Some(args.data_volume.unwrap_or(effective.data_volume)),
        agent: args.agent.unwrap_or(effective.agent),
        image_tag: args.image_tag,
        credentials: CredentialsMode::parse(&args.credentials)?,
        acknowledge_credential_risk: args.acknowledge_credential_risk,
        restart: args.restart,
        fresh: args.fresh,
        reset: args.reset,
        force: args.force,
        detached: args.detached,
        shell: args.shell,
        quiet: args.quiet,
        verbose: args.verbose,
        debug: args.debug,
        mount_docker_socket: args.mount_docker_socket,
        please_root_my_host: args.please_root_my_host,
        env_vars: args.env,
        volume_specs: args.volume,
        agent_args: args.agent_args,
    };
    lifecycle.run(&req)
}

fn cmd_shell(args: ShellArgs) -> Result<()> {
    let ws = resolve_workspace(args.path)?;
    let store = load_config_store(args.config.as_deref(), &ws)?;
    let effective = store.effective(&ws);
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let lifecycle = Lifecycle::new(&adapter, endpoint.as_ref());

    let req = RunRequest {
        name: args.name,
        workspace: ws,
        data_volume: Some(args.data_volume.unwrap_or(effective.data_volume)),
        agent: args.agent.unwrap_or(effective.agent),
        image_tag: None,
        credentials: CredentialsMode::Isolated,
        acknowledge_credential_risk: false,
        restart: args.restart,
        fresh: false,
        reset: false,
        force: args.force,
        detached: false,
        shell: true,
        quiet: args.quiet,
        verbose: args.verbose,
        debug: false,
        mount_docker_socket: false,
        please_root_my_host: false,
        env_vars: Vec::new(),
        volume_specs: Vec::new(),
        agent_args: Vec::new(),
    };
    lifecycle.run(&req)
}

fn cmd_exec(name: Option<String>, workspace: Option<PathBuf>, command: Vec<String>) -> Result<()> {
    let name = match name {
        Some(n) => n,
        None => {
            let ws = resolve_workspace(workspace)?;
            lifecycle::naming::derive_container_name(&ws)
        }
    };
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let lifecycle = Lifecycle::new(&adapter, endpoint.as_ref());
    lifecycle.exec_command(&name, command.into_iter().map(std::ffi::OsString::from).collect())
}

fn cmd_stop(name: Option<String>, all: bool, remove: bool, force: bool) -> Result<()> {
    let _ = remove; // teardown always stops and removes; kept for CLI compatibility
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let lifecycle = Lifecycle::new(&adapter, endpoint.as_ref());

    let target = if all {
        None
    } else {
        Some(match name {
            Some(n) => n,
            None => lifecycle::naming::derive_container_name(&resolve_workspace(None)?),
        })
    };

    if !force && !all && !confirm_stop(&lifecycle, target.as_deref())? {
        color::log_warn("aborted");
        return Ok(());
    }

    let stopped = lifecycle.stop(target.as_deref())?;
    for name in &stopped {
        color::log_ok(&format!("stopped {name}"));
    }
    if stopped.is_empty() {
        color::log_info("no ContainAI-owned containers to stop");
    }
    Ok(())
}

/// Refuse to stop anything on a non-interactive stdin unless `--force` or
/// `--all` was passed; otherwise print what would be stopped and ask for `y`.
fn confirm_stop(lifecycle: &Lifecycle<'_>, target: Option<&str>) -> Result<bool> {
    let report = lifecycle.status(target)?;
    if report.is_empty() {
        return Ok(true);
    }
    if !atty::is(atty::Stream::Stdin) {
        return Err(ContainAiError::usage(
            "refusing to stop without confirmation on non-interactive stdin; re-run with --force",
        ));
    }
    eprint!(
        "about to stop {} container(s): {}. Proceed? [y/N] ",
        report.len(),
        report.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(", ")
    );
    use std::io::Write;
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn cmd_status(json: bool, name: Option<String>) -> Result<()> {
    let adapter = RuntimeAdapter::default();
    let endpoint = resolve_endpoint(&adapter);
    let lifecycle = Lifecycle::new(&adapter, endpoint.as_ref());
    let report = lifecycle.status(name.as_deref())?;
    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| ContainAiError::precondition(format!("failed to render status report: {e}"), None))?;
        println!("{rendered}");
    } else {
        for r in &report {
            println!(
                "{}\t{}\t{}\t{}",
                r.name,
                r.state,
                r.image.as_deref().unwrap_or("-"),
                if r.owned { "owned" } else { "foreign" }
            );
        }
    }
    Ok(())
}
