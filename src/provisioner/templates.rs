//! Renders the hardened-runtime configuration templates Provisioner would
//! otherwise materialize at install time, for inspection via
//! `cai doctor --build-templates` without running `setup`.

use crate::platform::{PlatformKind, PlatformProbe};
use crate::provisioner::{macos, wsl2_linux, DEDICATED_SOCKET_PATH, HARDENED_RUNTIME_NAME};

pub fn render_all(platform: &PlatformProbe) -> Vec<(&'static str, String)> {
    match platform.kind {
        PlatformKind::MacOs => vec![("vm-template.yaml", macos::render_vm_template(2375))],
        _ => vec![
            (
                "daemon.json.patch",
                format!(
                    "{{\n  \"runtimes\": {{\n    \"{HARDENED_RUNTIME_NAME}\": {{ \"path\": \"/usr/bin/{HARDENED_RUNTIME_NAME}\" }}\n  }}\n}}\n"
                ),
            ),
            (
                "docker.service.d/containai-secure.conf",
                wsl2_linux::render_systemd_dropin(
                    "ExecStart=/usr/bin/dockerd -H fd://",
                    DEDICATED_SOCKET_PATH,
                ),
            ),
        ],
    }
}
