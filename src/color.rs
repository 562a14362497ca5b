#![allow(clippy::module_name_repetitions)]
//! ANSI-aware stderr logging.
//!
//! Precedence for whether color is used: `CONTAINAI_COLOR` env value >
//! programmatic override (`set_color_mode`, used by tests) > `NO_COLOR` >
//! TTY auto-detection.

use once_cell::sync::OnceCell;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Always,
    Never,
    Auto,
}

static COLOR_OVERRIDE: OnceCell<ColorMode> = OnceCell::new();

/// Test/programmatic override; first call wins (matches `OnceCell` semantics).
pub fn set_color_mode(mode: ColorMode) {
    let _ = COLOR_OVERRIDE.set(mode);
}

fn resolved_mode() -> ColorMode {
    if let Ok(v) = env::var("CONTAINAI_COLOR") {
        match v.to_ascii_lowercase().as_str() {
            "always" => return ColorMode::Always,
            "never" => return ColorMode::Never,
            "auto" => return ColorMode::Auto,
            _ => {}
        }
    }
    if let Some(m) = COLOR_OVERRIDE.get() {
        return *m;
    }
    if env::var_os("NO_COLOR").is_some() {
        return ColorMode::Never;
    }
    ColorMode::Auto
}

pub fn color_enabled_stderr() -> bool {
    match resolved_mode() {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => atty::is(atty::Stream::Stderr),
    }
}

pub fn paint(use_color: bool, code: &str, s: &str) -> String {
    if use_color {
        format!("\x1b[{code}m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

pub fn verbose_enabled() -> bool {
    env::var("CONTAINAI_VERBOSE")
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub fn log_info(msg: &str) {
    let c = color_enabled_stderr();
    eprintln!("{} {}", paint(c, "34;1", "[INFO]"), msg);
}

pub fn log_ok(msg: &str) {
    let c = color_enabled_stderr();
    eprintln!("{} {}", paint(c, "32;1", "[OK]"), msg);
}

pub fn log_warn(msg: &str) {
    let c = color_enabled_stderr();
    eprintln!("{} {}", paint(c, "33;1", "[WARN]"), msg);
}

pub fn log_error(msg: &str) {
    let c = color_enabled_stderr();
    eprintln!("{} {}", paint(c, "31;1", "[ERROR]"), msg);
}

pub fn log_debug(msg: &str) {
    if !verbose_enabled() {
        return;
    }
    let c = color_enabled_stderr();
    eprintln!("{} {}", paint(c, "90", "[DEBUG]"), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_is_noop_without_color() {
        assert_eq!(paint(false, "31", "x"), "x");
        assert_eq!(paint(true, "31", "x"), "\x1b[31mx\x1b[0m");
    }
}
