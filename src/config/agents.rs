//! Known agents and their default image references.
//!
//! Mirrors the teacher's per-agent image-selection helper, generalized to
//! ContainAI's image repository and the agent catalog this spec names.

use std::env;

pub const IMAGE_REPOSITORY_PREFIX: &str = "ghcr.io/containai";

pub const KNOWN_AGENTS: &[&str] = &["claude", "gemini", "codex", "aider"];

pub const DEFAULT_AGENT: &str = "claude";

pub fn is_known_agent(name: &str) -> bool {
    KNOWN_AGENTS.contains(&name)
}

/// Default image reference for an agent, honoring `CONTAINAI_IMAGE_TAG` and
/// an explicit `--image-tag` override from the caller.
pub fn default_image_for(agent: &str, image_tag: Option<&str>) -> String {
    let tag = image_tag
        .map(str::to_string)
        .or_else(|| env::var("CONTAINAI_IMAGE_TAG").ok())
        .unwrap_or_else(|| "latest".to_string());
    format!("{IMAGE_REPOSITORY_PREFIX}/{agent}:{tag}")
}

/// Whether `image` is one of ContainAI's own agent images, used by the
/// ownership fallback check (§3 Container identity).
pub fn is_containai_image(image: &str) -> bool {
    image.starts_with(IMAGE_REPOSITORY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_tagged_image() {
        std::env::remove_var("CONTAINAI_IMAGE_TAG");
        assert_eq!(
            default_image_for("claude", None),
            "ghcr.io/containai/claude:latest"
        );
    }

    #[test]
    fn explicit_tag_wins_over_env() {
        std::env::set_var("CONTAINAI_IMAGE_TAG", "from-env");
        assert_eq!(
            default_image_for("claude", Some("pinned")),
            "ghcr.io/containai/claude:pinned"
        );
        std::env::remove_var("CONTAINAI_IMAGE_TAG");
    }

    #[test]
    fn recognizes_containai_images() {
        assert!(is_containai_image("ghcr.io/containai/claude:latest"));
        assert!(!is_containai_image("alpine:latest"));
    }
}
