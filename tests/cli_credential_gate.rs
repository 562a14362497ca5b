use std::process::Command;
use tempfile::tempdir;

/// Spec scenario 6: `run --credentials=host` without the acknowledgement
/// flag must hard-fail before anything is created, regardless of whether a
/// container runtime is actually installed on the test host.
#[test]
fn credentials_host_without_acknowledgement_hard_fails() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let ws = tempdir().unwrap();
    let out = Command::new(bin)
        .arg("run")
        .arg(ws.path())
        .arg("--credentials=host")
        .output()
        .expect("failed to run cai run");
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("acknowledge-credential-risk"),
        "expected remediation hint in stderr, got: {stderr}"
    );
}

#[test]
fn unknown_agent_is_a_usage_error() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let ws = tempdir().unwrap();
    let out = Command::new(bin)
        .arg("run")
        .arg(ws.path())
        .arg("--agent")
        .arg("definitely-not-a-known-agent")
        .output()
        .expect("failed to run cai run");
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unknown agent"));
}

#[test]
fn docker_socket_mount_without_acknowledgement_hard_fails() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let ws = tempdir().unwrap();
    let out = Command::new(bin)
        .arg("run")
        .arg(ws.path())
        .arg("--mount-docker-socket")
        .output()
        .expect("failed to run cai run");
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("please-root-my-host"));
}
