//! `{context-name, socket-URI}` pairs addressed by the adapter.

/// A named pointer to a container-daemon socket. The default endpoint is
/// whatever the user's container CLI already points at; the hardened
/// endpoint is created by the Provisioner and always names a dedicated
/// socket distinct from the default one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEndpoint {
    pub context_name: String,
    pub socket_uri: String,
}

impl RuntimeEndpoint {
    pub const HARDENED_NAME_DEFAULT: &'static str = "containai-secure";

    pub fn new(context_name: impl Into<String>, socket_uri: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            socket_uri: socket_uri.into(),
        }
    }

    /// Name of the hardened endpoint, honoring `CONTAINAI_SECURE_ENGINE_CONTEXT`.
    pub fn hardened_name() -> String {
        std::env::var("CONTAINAI_SECURE_ENGINE_CONTEXT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Self::HARDENED_NAME_DEFAULT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardened_name_defaults_when_env_unset() {
        std::env::remove_var("CONTAINAI_SECURE_ENGINE_CONTEXT");
        assert_eq!(RuntimeEndpoint::hardened_name(), "containai-secure");
    }

    #[test]
    fn hardened_name_honors_override() {
        std::env::set_var("CONTAINAI_SECURE_ENGINE_CONTEXT", "my-secure-ctx");
        assert_eq!(RuntimeEndpoint::hardened_name(), "my-secure-ctx");
        std::env::remove_var("CONTAINAI_SECURE_ENGINE_CONTEXT");
    }
}
