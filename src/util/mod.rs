#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping and the line-based shell-fragment builders.

pub mod shell_file;
pub mod shell_script;
pub mod text_lines;

pub use shell_file::ShellFile;
pub use shell_script::ShellScript;
pub use text_lines::TextLines;

/// `^[A-Za-z0-9][A-Za-z0-9_.-]*$`, length 1-255: the DataVolume name
/// constraint (§3), shared by SyncEngine, EnvImporter, ExportEngine, and
/// Lifecycle so a hostile name can never reach a shell fragment or bind
/// mount built from it.
pub fn validate_volume_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 255 {
        return Err(format!(
            "volume name must be 1-255 characters, got {}",
            name.len()
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphanumeric() {
        return Err(format!("volume name '{name}' must start with a letter or digit"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(format!(
            "volume name '{name}' may only contain letters, digits, '_', '.', '-'"
        ));
    }
    Ok(())
}

/// Reject strings containing newline, carriage return, or NUL before embedding into a shell
/// command or a config value that will cross a trust boundary (exclude entries, env values).
pub fn reject_newlines(s: &str, what: &str) -> Result<(), String> {
    if s.contains('\n') || s.contains('\r') || s.contains('\0') {
        Err(format!("refusing to accept {what}: contains newline"))
    } else {
        Ok(())
    }
}

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_simple() {
        assert_eq!(shell_escape("abc-123_./:@"), "abc-123_./:@");
    }

    #[test]
    fn test_shell_escape_with_spaces_and_quotes() {
        assert_eq!(shell_escape("a b c"), "'a b c'");
        assert_eq!(shell_escape("O'Reilly"), "'O'\"'\"'Reilly'");
    }

    #[test]
    fn test_shell_join() {
        let args = vec!["a".to_string(), "b c".to_string(), "d".to_string()];
        assert_eq!(shell_join(&args), "a 'b c' d");
    }

    #[test]
    fn test_reject_newlines() {
        assert!(reject_newlines("clean", "value").is_ok());
        assert!(reject_newlines("has\nnewline", "value").is_err());
        assert!(reject_newlines("has\rcr", "value").is_err());
    }

    #[test]
    fn validate_volume_name_accepts_typical_names() {
        assert!(validate_volume_name("containai-data").is_ok());
        assert!(validate_volume_name("a").is_ok());
        assert!(validate_volume_name("A1.b_c-D").is_ok());
    }

    #[test]
    fn validate_volume_name_rejects_bad_first_char() {
        assert!(validate_volume_name("-leading-dash").is_err());
        assert!(validate_volume_name("_leading-underscore").is_err());
        assert!(validate_volume_name(".leading-dot").is_err());
    }

    #[test]
    fn validate_volume_name_rejects_path_like_or_empty() {
        assert!(validate_volume_name("").is_err());
        assert!(validate_volume_name("../etc").is_err());
        assert!(validate_volume_name("vol/name").is_err());
    }

    #[test]
    fn validate_volume_name_rejects_overlong() {
        let name = "a".repeat(256);
        assert!(validate_volume_name(&name).is_err());
    }
}
