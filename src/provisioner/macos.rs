//! macOS install steps: a managed Linux-VM template that runs the daemon
//! and the hardened runtime inside the VM. Fully additive — the user's
//! primary host endpoint (e.g. a desktop variant) is never touched.

/// Render the VM template (cloud-init-style) that provisions the daemon and
/// hardened runtime inside the managed VM.
pub fn render_vm_template(dedicated_socket_forward_port: u16) -> String {
    format!(
        "# containai managed VM template\n\
         vm:\n\
         \u{20}\u{20}cpu: 2\n\
         \u{20}\u{20}memory: 4GiB\n\
         \u{20}\u{20}disk: 20GiB\n\
         provision:\n\
         \u{20}\u{20}- install: docker-ce\n\
         \u{20}\u{20}- install: sysbox-ce\n\
         \u{20}\u{20}- configure: docker-daemon-runtime sysbox-runc\n\
         forward:\n\
         \u{20}\u{20}- host_port: {dedicated_socket_forward_port}\n\
         \u{20}\u{20}\u{20}\u{20}guest_socket: /run/containai-secure.sock\n"
    )
}
