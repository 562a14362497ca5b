//! Timeout-bounded external process execution.
//!
//! `RuntimeAdapter` and `Provisioner` never shell out directly; they build an
//! `ExecRequest` and hand it to an `ExecService`, which always enforces a
//! timeout and never lets ambient environment leak into the child unless the
//! caller opts in explicitly (`inherit_env` / `allowed_env`).

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct ExecService {
    allowed_env: Option<BTreeSet<String>>,
    default_timeout: Duration,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            allowed_env: None,
            default_timeout,
        }
    }

    pub fn with_allowed_env<I, S>(default_timeout: Duration, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = allowed.into_iter().map(Into::into).collect();
        Self {
            allowed_env: Some(set),
            default_timeout,
        }
    }

    pub fn run(&self, request: ExecRequest) -> Result<ExecOutcome> {
        let mut cmd = Command::new(&request.program);
        for arg in &request.args {
            cmd.arg(arg);
        }
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }

        if !request.inherit_env || self.allowed_env.is_some() {
            cmd.env_clear();
        }

        if let Some(allowed) = &self.allowed_env {
            for (key, value) in std::env::vars_os() {
                if let Ok(k) = key.clone().into_string() {
                    if allowed.contains(&k) {
                        cmd.env(&key, &value);
                    }
                }
            }
        } else if request.inherit_env {
            for (key, value) in std::env::vars_os() {
                cmd.env(&key, &value);
            }
        }

        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        if request.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        if request.null_stdin {
            cmd.stdin(Stdio::null());
        }

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {:?} with args {:?}",
                request.program, request.args
            )
        })?;

        let mut stdout_pipe = if request.capture_output {
            child.stdout.take()
        } else {
            None
        };
        let mut stderr_pipe = if request.capture_output {
            child.stderr.take()
        } else {
            None
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let status = if timeout.is_zero() {
            child.wait().context("failed to wait for process")?
        } else {
            match child
                .wait_timeout(timeout)
                .context("failed to wait with timeout")?
            {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(ExecOutcome::Timeout {
                        program: request.program.clone(),
                        elapsed: started.elapsed(),
                    });
                }
            }
        };

        let duration = started.elapsed();
        let (stdout, stderr) = if request.capture_output {
            (
                read_stream(stdout_pipe.as_mut())?,
                read_stream(stderr_pipe.as_mut())?,
            )
        } else {
            (String::new(), String::new())
        };

        Ok(ExecOutcome::Completed(ExecOutput {
            status,
            duration,
            stdout,
            stderr,
        }))
    }
}

fn read_stream(stream: Option<&mut impl io::Read>) -> Result<String> {
    let mut buf = String::new();
    if let Some(reader) = stream {
        reader
            .read_to_string(&mut buf)
            .context("failed to read process output")?;
    }
    Ok(buf)
}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[derive(Debug, Default)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    inherit_env: bool,
    timeout: Option<Duration>,
    capture_output: bool,
    null_stdin: bool,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            inherit_env: false,
            capture_output: true,
            null_stdin: true,
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Used for `run`/`exec`/`shell`, which must attach to the caller's TTY.
    pub fn inherit_stdio(mut self) -> Self {
        self.capture_output = false;
        self.null_stdin = false;
        self
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    pub status: std::process::ExitStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Distinguishes a completed process (success or non-zero exit, still
/// carrying captured output for classification) from a timeout.
#[derive(Debug)]
pub enum ExecOutcome {
    Completed(ExecOutput),
    Timeout {
        program: OsString,
        elapsed: Duration,
    },
}

impl ExecOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecOutcome::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_and_captures_output() {
        let svc = ExecService::new(Duration::from_secs(5));
        let req = ExecRequest::new("sh").arg("-c").arg("echo hi");
        let outcome = svc.run(req).unwrap();
        match outcome {
            ExecOutcome::Completed(out) => {
                assert!(out.success());
                assert_eq!(out.stdout.trim(), "hi");
            }
            ExecOutcome::Timeout { .. } => panic!("unexpected timeout"),
        }
    }

    #[test]
    fn times_out_and_kills_child() {
        let svc = ExecService::new(Duration::from_millis(50));
        let req = ExecRequest::new("sh").arg("-c").arg("sleep 5");
        let outcome = svc.run(req).unwrap();
        assert!(outcome.is_timeout());
    }

    #[test]
    fn clears_ambient_env_by_default() {
        std::env::set_var("CONTAINAI_TEST_LEAK", "1");
        let svc = ExecService::new(Duration::from_secs(5));
        let req = ExecRequest::new("sh").arg("-c").arg("echo ${CONTAINAI_TEST_LEAK:-unset}");
        let outcome = svc.run(req).unwrap();
        std::env::remove_var("CONTAINAI_TEST_LEAK");
        match outcome {
            ExecOutcome::Completed(out) => assert_eq!(out.stdout.trim(), "unset"),
            ExecOutcome::Timeout { .. } => panic!("unexpected timeout"),
        }
    }
}
